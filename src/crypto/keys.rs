//! Key material for xcryptfs
//!
//! - Master Key: derived once per mount from the passphrase
//! - File Keys: derived per ciphertext stream from the master key and the
//!   random salt stored in that stream's header

use crate::config::EncryptionConfig;
use crate::crypto::{derive_key, KEY_SIZE};
use crate::error::{Error, Result};
use ring::hkdf::{self, Salt, HKDF_SHA256};
use std::fmt;
use zeroize::Zeroizing;

/// HKDF info string for per-file keys
const FILE_KEY_INFO: &[u8] = b"xcryptfs-file-v1";

/// Master key derived from the mount passphrase
pub struct MasterKey {
    key: Zeroizing<[u8; KEY_SIZE]>,
}

impl MasterKey {
    /// Derive the master key from a passphrase
    pub fn from_passphrase(passphrase: &[u8], config: &EncryptionConfig) -> Result<Self> {
        if passphrase.is_empty() {
            return Err(Error::KeyDerivation("Passphrase cannot be empty".to_string()));
        }

        let key = derive_key(passphrase, &config.salt, config)?;
        Ok(MasterKey { key })
    }

    /// Wrap existing key material
    pub fn from_bytes(key: [u8; KEY_SIZE]) -> Self {
        MasterKey {
            key: Zeroizing::new(key),
        }
    }

    /// Get the raw key bytes
    pub fn key(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }

    /// Derive the key for one ciphertext stream
    pub fn file_key(&self, file_salt: &[u8]) -> Result<FileKey> {
        let salt = Salt::new(HKDF_SHA256, file_salt);
        let prk = salt.extract(self.key.as_ref());

        let mut output = Zeroizing::new([0u8; KEY_SIZE]);
        prk.expand(&[FILE_KEY_INFO], HkdfKeyType)
            .map_err(|_| Error::KeyDerivation("HKDF expansion failed".to_string()))?
            .fill(output.as_mut())
            .map_err(|_| Error::KeyDerivation("HKDF fill failed".to_string()))?;

        Ok(FileKey { key: output })
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterKey(<redacted>)")
    }
}

/// Per-stream encryption key
pub struct FileKey {
    key: Zeroizing<[u8; KEY_SIZE]>,
}

impl FileKey {
    /// Get the raw key bytes
    pub fn key(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }
}

/// HKDF key type for ring
struct HkdfKeyType;

impl hkdf::KeyType for HkdfKeyType {
    fn len(&self) -> usize {
        KEY_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SALT_SIZE;

    fn test_config() -> EncryptionConfig {
        EncryptionConfig {
            argon2_memory_kib: 1024,
            argon2_iterations: 1,
            argon2_parallelism: 1,
            salt: Vec::new(),
        }
    }

    #[test]
    fn test_master_key_deterministic() {
        let config = test_config();
        let key1 = MasterKey::from_passphrase(b"password", &config).unwrap();
        let key2 = MasterKey::from_passphrase(b"password", &config).unwrap();
        assert_eq!(key1.key(), key2.key());
    }

    #[test]
    fn test_empty_passphrase_rejected() {
        let config = test_config();
        assert!(MasterKey::from_passphrase(b"", &config).is_err());
    }

    #[test]
    fn test_file_keys_depend_on_salt() {
        let master = MasterKey::from_bytes([9u8; KEY_SIZE]);

        let a = master.file_key(&[1u8; SALT_SIZE]).unwrap();
        let b = master.file_key(&[2u8; SALT_SIZE]).unwrap();
        let a_again = master.file_key(&[1u8; SALT_SIZE]).unwrap();

        assert_ne!(a.key(), b.key());
        assert_eq!(a.key(), a_again.key());
    }

    #[test]
    fn test_debug_is_redacted() {
        let master = MasterKey::from_bytes([0x41u8; KEY_SIZE]);
        let rendered = format!("{:?}", master);
        assert_eq!(rendered, "MasterKey(<redacted>)");
    }
}
