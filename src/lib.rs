//! xcryptfs - Mirror filesystem with transparent per-file encryption
//!
//! This library provides a FUSE filesystem that mirrors a backing
//! directory. Files created through the mount are stored encrypted and
//! flagged with an extended attribute; pre-existing files pass through
//! as plaintext.

pub mod config;
pub mod context;
pub mod crypto;
pub mod error;
pub mod fs;
pub mod metadata;
pub mod mount;

#[cfg(test)]
mod test_support;

pub use config::Config;
pub use error::{Error, Result};
