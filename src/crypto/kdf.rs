//! Passphrase key derivation using Argon2id

use crate::config::EncryptionConfig;
use crate::crypto::{KEY_SIZE, SALT_SIZE};
use crate::error::{Error, Result};
use argon2::{Algorithm, Argon2, Params, Version};
use zeroize::Zeroizing;

/// Salt used when the configuration does not provide one.
///
/// The filesystem keeps no state besides the per-file marker, so the
/// passphrase must map to the same master key on every mount.
pub const DEFAULT_KDF_SALT: [u8; SALT_SIZE] = *b"xcryptfs-passphrase-salt-v1\0\0\0\0\0";

/// Derive a key from a passphrase using Argon2id
///
/// An empty `salt` selects [`DEFAULT_KDF_SALT`]; otherwise the first
/// `SALT_SIZE` bytes are used.
pub fn derive_key(
    passphrase: &[u8],
    salt: &[u8],
    config: &EncryptionConfig,
) -> Result<Zeroizing<[u8; KEY_SIZE]>> {
    let salt = match salt.len() {
        0 => &DEFAULT_KDF_SALT[..],
        n if n >= SALT_SIZE => &salt[..SALT_SIZE],
        n => {
            return Err(Error::KeyDerivation(format!(
                "Salt too short: {} bytes, need {}",
                n, SALT_SIZE
            )));
        }
    };

    let params = Params::new(
        config.argon2_memory_kib,
        config.argon2_iterations,
        config.argon2_parallelism,
        Some(KEY_SIZE),
    )
    .map_err(|e| Error::KeyDerivation(format!("Invalid Argon2 parameters: {}", e)))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    argon2
        .hash_password_into(passphrase, salt, key.as_mut())
        .map_err(|e| Error::KeyDerivation(format!("Key derivation failed: {}", e)))?;

    Ok(key)
}
