//! Cryptography module for xcryptfs
//!
//! The filesystem core only relies on the [`CipherGateway`] contract: a
//! whole-stream transformation keyed by material derived from the mount
//! passphrase. The default gateway seals each file with AES-256-GCM under a
//! per-file key expanded from an Argon2id master key.

mod encryption;
mod gateway;
mod kdf;
mod keys;

pub use encryption::{open, seal, EncryptedData};
pub use gateway::{AesGcmGateway, CipherGateway, Direction, STREAM_MAGIC, STREAM_OVERHEAD};
pub use kdf::{derive_key, DEFAULT_KDF_SALT};
pub use keys::{FileKey, MasterKey};

/// Size of AES-256 key in bytes
pub const KEY_SIZE: usize = 32;

/// Size of GCM nonce in bytes
pub const NONCE_SIZE: usize = 12;

/// Size of GCM authentication tag in bytes
pub const TAG_SIZE: usize = 16;

/// Size of salt for key derivation
pub const SALT_SIZE: usize = 32;
