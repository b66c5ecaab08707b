//! Error types for xcryptfs

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for xcryptfs
#[derive(Error, Debug)]
pub enum Error {
    // Crypto errors
    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Decryption error: {0}")]
    Decryption(String),

    #[error("Key derivation error: {0}")]
    KeyDerivation(String),

    // Startup errors
    #[error("Usage error: {0}")]
    Usage(String),

    // Config errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Filesystem errors
    #[error("Inode not found: {0}")]
    InodeNotFound(u64),

    #[error("Invalid offset: {0}")]
    InvalidOffset(i64),

    #[error("Extended attribute {0} is managed by the filesystem")]
    MarkerProtected(String),

    #[error("Invalid extended attribute name: {0}")]
    InvalidXattrName(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("System error: {0}")]
    Sys(#[from] nix::errno::Errno),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Convert to libc errno for FUSE
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Error::InodeNotFound(_) => libc::ENOENT,
            Error::InvalidOffset(_) | Error::InvalidXattrName(_) => libc::EINVAL,
            Error::MarkerProtected(_) => libc::EPERM,
            Error::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
            Error::Sys(errno) => *errno as libc::c_int,
            _ => libc::EIO,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_keeps_os_code() {
        let err = Error::from(io::Error::from_raw_os_error(libc::ENOSPC));
        assert_eq!(err.to_errno(), libc::ENOSPC);
    }

    #[test]
    fn test_synthetic_io_error_is_eio() {
        let err = Error::from(io::Error::new(io::ErrorKind::Other, "boom"));
        assert_eq!(err.to_errno(), libc::EIO);
    }

    #[test]
    fn test_cipher_failures_surface_as_eio() {
        assert_eq!(Error::Decryption("bad tag".into()).to_errno(), libc::EIO);
        assert_eq!(Error::Encryption("rng".into()).to_errno(), libc::EIO);
    }

    #[test]
    fn test_errno_mapping() {
        assert_eq!(Error::Sys(nix::errno::Errno::EACCES).to_errno(), libc::EACCES);
        assert_eq!(Error::InodeNotFound(7).to_errno(), libc::ENOENT);
        assert_eq!(Error::InvalidOffset(-1).to_errno(), libc::EINVAL);
        assert_eq!(
            Error::MarkerProtected("user.encrypted".into()).to_errno(),
            libc::EPERM
        );
    }
}
