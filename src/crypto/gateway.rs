//! Cipher Gateway: the whole-stream transformation used by the pipelines
//!
//! A gateway has no notion of byte ranges. Callers stage whichever full
//! view they need and hand the complete stream over in one call.

use crate::crypto::{open, seal, EncryptedData, MasterKey, NONCE_SIZE, SALT_SIZE, TAG_SIZE};
use crate::error::{Error, Result};
use rand::RngCore;
use std::io::{Read, Write};
use zeroize::Zeroizing;

/// Leading bytes of every ciphertext stream
pub const STREAM_MAGIC: &[u8; 4] = b"XCF1";

/// Magic plus per-stream salt; authenticated as AAD
const HEADER_SIZE: usize = STREAM_MAGIC.len() + SALT_SIZE;

/// Fixed number of bytes a ciphertext stream carries beyond its plaintext
pub const STREAM_OVERHEAD: usize = HEADER_SIZE + NONCE_SIZE + TAG_SIZE;

/// Transformation direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Encrypt,
    Decrypt,
}

/// Whole-stream byte transformation keyed by the mount secret
///
/// On success `output` holds the transformation of every byte readable from
/// `input`. On failure the content of `output` is unspecified and must be
/// discarded. Encrypt and decrypt under the same key are exact inverses.
pub trait CipherGateway: Send + Sync {
    fn transform(
        &self,
        input: &mut dyn Read,
        output: &mut dyn Write,
        direction: Direction,
        key: &MasterKey,
    ) -> Result<()>;

    /// Plaintext length of a stored ciphertext stream of `stored_len` bytes
    fn plaintext_len(&self, stored_len: u64) -> u64 {
        stored_len
    }
}

/// AES-256-GCM gateway
///
/// Stream layout: `magic | salt | nonce | ciphertext || tag`. Every stream
/// is sealed under its own key expanded from the master key and the salt.
#[derive(Debug, Default, Clone, Copy)]
pub struct AesGcmGateway;

impl AesGcmGateway {
    pub fn new() -> Self {
        AesGcmGateway
    }

    fn encrypt(&self, plaintext: &[u8], output: &mut dyn Write, key: &MasterKey) -> Result<()> {
        let mut header = [0u8; HEADER_SIZE];
        header[..STREAM_MAGIC.len()].copy_from_slice(STREAM_MAGIC);
        rand::thread_rng().fill_bytes(&mut header[STREAM_MAGIC.len()..]);

        let file_key = key.file_key(&header[STREAM_MAGIC.len()..])?;
        let sealed = seal(file_key.key(), plaintext, &header)?;

        output.write_all(&header)?;
        sealed.write_to(output)?;
        output.flush()?;
        Ok(())
    }

    fn decrypt(&self, stream: &[u8], output: &mut dyn Write, key: &MasterKey) -> Result<()> {
        if stream.len() < STREAM_OVERHEAD {
            return Err(Error::Decryption(format!(
                "Stream too short: {} bytes, need at least {}",
                stream.len(),
                STREAM_OVERHEAD
            )));
        }

        let (header, body) = stream.split_at(HEADER_SIZE);
        if &header[..STREAM_MAGIC.len()] != STREAM_MAGIC {
            return Err(Error::Decryption("Not an xcryptfs stream".to_string()));
        }

        let file_key = key.file_key(&header[STREAM_MAGIC.len()..])?;
        let sealed = EncryptedData::from_bytes(body)?;
        let plaintext = Zeroizing::new(open(file_key.key(), &sealed, header)?);

        output.write_all(&plaintext)?;
        output.flush()?;
        Ok(())
    }
}

impl CipherGateway for AesGcmGateway {
    fn transform(
        &self,
        input: &mut dyn Read,
        output: &mut dyn Write,
        direction: Direction,
        key: &MasterKey,
    ) -> Result<()> {
        let mut buffer = Zeroizing::new(Vec::new());
        input.read_to_end(&mut buffer)?;

        match direction {
            Direction::Encrypt => self.encrypt(&buffer, output, key),
            Direction::Decrypt => self.decrypt(&buffer, output, key),
        }
    }

    fn plaintext_len(&self, stored_len: u64) -> u64 {
        stored_len.saturating_sub(STREAM_OVERHEAD as u64)
    }
}
