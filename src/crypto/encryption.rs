//! AES-256-GCM sealing of whole buffers

use crate::crypto::{KEY_SIZE, NONCE_SIZE, TAG_SIZE};
use crate::error::{Error, Result};
use rand::RngCore;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use std::io::Write;

/// Nonce plus ciphertext with appended authentication tag
#[derive(Debug, Clone)]
pub struct EncryptedData {
    /// Nonce used for encryption (unique per encryption)
    pub nonce: [u8; NONCE_SIZE],
    /// Ciphertext with appended authentication tag
    pub ciphertext: Vec<u8>,
}

impl EncryptedData {
    /// Total serialized size
    pub fn size(&self) -> usize {
        NONCE_SIZE + self.ciphertext.len()
    }

    /// Serialize as `nonce || ciphertext`
    pub fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> std::io::Result<()> {
        out.write_all(&self.nonce)?;
        out.write_all(&self.ciphertext)
    }

    /// Parse `nonce || ciphertext`
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < NONCE_SIZE + TAG_SIZE {
            return Err(Error::Decryption("Data too short".to_string()));
        }

        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&bytes[..NONCE_SIZE]);

        Ok(EncryptedData {
            nonce,
            ciphertext: bytes[NONCE_SIZE..].to_vec(),
        })
    }
}

fn aead_key(key: &[u8; KEY_SIZE]) -> Option<LessSafeKey> {
    UnboundKey::new(&AES_256_GCM, key).ok().map(LessSafeKey::new)
}

/// Encrypt `plaintext` under a fresh random nonce
///
/// `aad` is authenticated but not encrypted.
pub fn seal(key: &[u8; KEY_SIZE], plaintext: &[u8], aad: &[u8]) -> Result<EncryptedData> {
    let sealing_key = aead_key(key)
        .ok_or_else(|| Error::Encryption("Failed to create encryption key".to_string()))?;

    let mut nonce = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce);

    let mut in_out = Vec::with_capacity(plaintext.len() + TAG_SIZE);
    in_out.extend_from_slice(plaintext);

    sealing_key
        .seal_in_place_append_tag(Nonce::assume_unique_for_key(nonce), Aad::from(aad), &mut in_out)
        .map_err(|_| Error::Encryption("Encryption failed".to_string()))?;

    Ok(EncryptedData {
        nonce,
        ciphertext: in_out,
    })
}

/// Decrypt and authenticate a sealed buffer
pub fn open(key: &[u8; KEY_SIZE], sealed: &EncryptedData, aad: &[u8]) -> Result<Vec<u8>> {
    if sealed.ciphertext.len() < TAG_SIZE {
        return Err(Error::Decryption("Ciphertext too short".to_string()));
    }

    let opening_key = aead_key(key)
        .ok_or_else(|| Error::Decryption("Failed to create decryption key".to_string()))?;

    let mut in_out = sealed.ciphertext.clone();
    let plaintext = opening_key
        .open_in_place(
            Nonce::assume_unique_for_key(sealed.nonce),
            Aad::from(aad),
            &mut in_out,
        )
        .map_err(|_| Error::Decryption("Decryption failed - data corrupted or wrong key".to_string()))?;

    Ok(plaintext.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key(byte: u8) -> [u8; KEY_SIZE] {
        [byte; KEY_SIZE]
    }

    #[test]
    fn test_seal_open() {
        let key = test_key(1);
        let sealed = seal(&key, b"Hello, xcryptfs!", b"header").unwrap();
        assert_eq!(sealed.size(), NONCE_SIZE + 16 + TAG_SIZE);

        let opened = open(&key, &sealed, b"header").unwrap();
        assert_eq!(opened, b"Hello, xcryptfs!");
    }

    #[test]
    fn test_nonces_are_fresh() {
        let key = test_key(1);
        let a = seal(&key, b"same", &[]).unwrap();
        let b = seal(&key, b"same", &[]).unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_wrong_aad_fails() {
        let key = test_key(1);
        let sealed = seal(&key, b"Secret data", b"file:1").unwrap();
        assert!(open(&key, &sealed, b"file:2").is_err());
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = seal(&test_key(1), b"Secret data", &[]).unwrap();
        assert!(matches!(
            open(&test_key(2), &sealed, &[]),
            Err(Error::Decryption(_))
        ));
    }

    #[test]
    fn test_serialized_form_parses_back() {
        let key = test_key(3);
        let sealed = seal(&key, b"", &[]).unwrap();

        let mut bytes = Vec::new();
        sealed.write_to(&mut bytes).unwrap();
        assert_eq!(bytes.len(), NONCE_SIZE + TAG_SIZE);

        let parsed = EncryptedData::from_bytes(&bytes).unwrap();
        assert_eq!(open(&key, &parsed, &[]).unwrap(), b"");
    }

    #[test]
    fn test_truncated_bytes_rejected() {
        assert!(EncryptedData::from_bytes(&[0u8; NONCE_SIZE + TAG_SIZE - 1]).is_err());
    }
}
