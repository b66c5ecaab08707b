//! Per-file metadata kept on the backing medium
//!
//! The only state the filesystem persists is the encryption marker, an
//! extended attribute on each file created through the mount.

mod marker;
mod xattrs;

pub use marker::{EncryptionOracle, MARKER_ATTR};
pub use xattrs::{encode_name_list, get_xattr, list_xattrs, remove_xattr, set_xattr};
