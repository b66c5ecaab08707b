//! Extended attribute passthrough
//!
//! Client xattr requests are forwarded to the backing file without
//! following symlinks. The encryption marker is readable but cannot be
//! changed or removed by clients.

use crate::error::{Error, Result};
use crate::metadata::MARKER_ATTR;
use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use tracing::trace;

/// Maximum xattr name length (Linux standard)
const XATTR_NAME_MAX: usize = 255;

/// Maximum xattr value size (64KB)
const XATTR_SIZE_MAX: usize = 65536;

fn validate_name(name: &OsStr) -> Result<()> {
    let bytes = name.as_bytes();

    if bytes.is_empty() || bytes.len() > XATTR_NAME_MAX || bytes.contains(&0) {
        return Err(Error::InvalidXattrName(name.to_string_lossy().into_owned()));
    }

    Ok(())
}

fn guard_marker(name: &OsStr) -> Result<()> {
    if name == OsStr::new(MARKER_ATTR) {
        return Err(Error::MarkerProtected(MARKER_ATTR.to_string()));
    }
    Ok(())
}

/// Read one attribute; `None` when absent
pub fn get_xattr(backing_path: &Path, name: &OsStr) -> Result<Option<Vec<u8>>> {
    validate_name(name)?;
    let value = xattr::get(backing_path, name)?;
    trace!("getxattr {:?} on {:?}: {:?} bytes", name, backing_path, value.as_ref().map(Vec::len));
    Ok(value)
}

/// Set one attribute
pub fn set_xattr(backing_path: &Path, name: &OsStr, value: &[u8]) -> Result<()> {
    validate_name(name)?;
    guard_marker(name)?;

    if value.len() > XATTR_SIZE_MAX {
        return Err(Error::Io(std::io::Error::from_raw_os_error(libc::E2BIG)));
    }

    xattr::set(backing_path, name, value)?;
    trace!("setxattr {:?} on {:?} ({} bytes)", name, backing_path, value.len());
    Ok(())
}

/// List attribute names
pub fn list_xattrs(backing_path: &Path) -> Result<Vec<OsString>> {
    Ok(xattr::list(backing_path)?.collect())
}

/// Remove one attribute
pub fn remove_xattr(backing_path: &Path, name: &OsStr) -> Result<()> {
    validate_name(name)?;
    guard_marker(name)?;
    xattr::remove(backing_path, name)?;
    trace!("removexattr {:?} on {:?}", name, backing_path);
    Ok(())
}

/// Encode names the way `listxattr(2)` returns them: NUL-terminated, concatenated
pub fn encode_name_list(names: &[OsString]) -> Vec<u8> {
    let mut data = Vec::new();
    for name in names {
        data.extend_from_slice(name.as_bytes());
        data.push(0);
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::xattrs_supported;
    use tempfile::tempdir;

    #[test]
    fn test_validate_name() {
        assert!(validate_name(OsStr::new("user.test")).is_ok());
        assert!(validate_name(OsStr::new("")).is_err());
        assert!(validate_name(OsStr::from_bytes(b"user.a\0b")).is_err());
        assert!(validate_name(OsStr::new(&"a".repeat(XATTR_NAME_MAX + 1))).is_err());
    }

    #[test]
    fn test_marker_is_protected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"").unwrap();

        let marker = OsStr::new(MARKER_ATTR);
        assert!(matches!(
            set_xattr(&path, marker, b"false"),
            Err(Error::MarkerProtected(_))
        ));
        assert!(matches!(
            remove_xattr(&path, marker),
            Err(Error::MarkerProtected(_))
        ));
    }

    #[test]
    fn test_oversized_value_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"").unwrap();

        let value = vec![0u8; XATTR_SIZE_MAX + 1];
        let err = set_xattr(&path, OsStr::new("user.big"), &value).unwrap_err();
        assert_eq!(err.to_errno(), libc::E2BIG);
    }

    #[test]
    fn test_set_get_list_remove() {
        let dir = tempdir().unwrap();
        if !xattrs_supported(dir.path()) {
            eprintln!("skipping: user xattrs unsupported on scratch filesystem");
            return;
        }

        let path = dir.path().join("f");
        std::fs::write(&path, b"").unwrap();
        let name = OsStr::new("user.comment");

        set_xattr(&path, name, b"hello").unwrap();
        assert_eq!(get_xattr(&path, name).unwrap().unwrap(), b"hello");
        assert!(list_xattrs(&path).unwrap().iter().any(|n| n == name));

        remove_xattr(&path, name).unwrap();
        assert!(get_xattr(&path, name).unwrap().is_none());
    }

    #[test]
    fn test_encode_name_list() {
        let names = vec![OsString::from("user.a"), OsString::from("user.bc")];
        assert_eq!(encode_name_list(&names), b"user.a\0user.bc\0");
        assert!(encode_name_list(&[]).is_empty());
    }
}
