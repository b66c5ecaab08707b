//! Encryption State Oracle
//!
//! Whether a backing file holds ciphertext is recorded out of band in the
//! `user.encrypted` extended attribute, never inferred from content.

use crate::error::Result;
use std::path::Path;
use tracing::trace;

/// Name of the marker attribute
pub const MARKER_ATTR: &str = "user.encrypted";

/// Value stored in the marker attribute
pub const MARKER_VALUE: &[u8] = b"true";

/// Reads and sets the encryption marker of backing files
#[derive(Debug, Default, Clone, Copy)]
pub struct EncryptionOracle;

impl EncryptionOracle {
    pub fn new() -> Self {
        EncryptionOracle
    }

    /// Check whether `backing_path` holds ciphertext
    ///
    /// A missing attribute, any other value, or any error reading it all
    /// mean plaintext.
    pub fn is_encrypted(&self, backing_path: &Path) -> bool {
        match xattr::get(backing_path, MARKER_ATTR) {
            Ok(Some(value)) => marker_is_set(&value),
            Ok(None) => false,
            Err(e) => {
                trace!("Marker unreadable on {:?}, treating as plaintext: {}", backing_path, e);
                false
            }
        }
    }

    /// Record that `backing_path` holds ciphertext
    pub fn mark_encrypted(&self, backing_path: &Path) -> Result<()> {
        xattr::set(backing_path, MARKER_ATTR, MARKER_VALUE)?;
        trace!("Marked {:?} as encrypted", backing_path);
        Ok(())
    }
}

/// Accept `true` with or without a trailing NUL
fn marker_is_set(value: &[u8]) -> bool {
    let value = value.strip_suffix(&[0]).unwrap_or(value);
    value == MARKER_VALUE
}
