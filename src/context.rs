//! Mount context and path resolution
//!
//! The mount context is built once at startup and shared immutably by every
//! request handler. It owns the backing root and the key material derived
//! from the passphrase.

use crate::config::EncryptionConfig;
use crate::crypto::MasterKey;
use crate::error::{Error, Result};
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

/// Character reserved for command-line options
const OPTION_MARKER: char = '-';

/// Secret passphrase supplied at startup
///
/// Wiped from memory on drop and never rendered by `Debug`.
pub struct Passphrase(Zeroizing<String>);

impl Passphrase {
    pub fn new(secret: String) -> Result<Self> {
        if secret.is_empty() {
            return Err(Error::Usage(
                "Please enter a non-empty passphrase for encryption".to_string(),
            ));
        }
        Ok(Passphrase(Zeroizing::new(secret)))
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Passphrase(<redacted>)")
    }
}

/// Process-wide state for one mounted instance
#[derive(Debug)]
pub struct MountContext {
    /// Absolute directory every virtual path is appended to
    backing_root: PathBuf,
    /// Key material derived from the passphrase
    key: MasterKey,
}

impl MountContext {
    /// Build the context, deriving the master key from `passphrase`
    pub fn new(
        backing_root: PathBuf,
        passphrase: &Passphrase,
        config: &EncryptionConfig,
    ) -> Result<Self> {
        let key = MasterKey::from_passphrase(passphrase.as_bytes(), config)?;
        Ok(Self::with_key(backing_root, key))
    }

    /// Build the context around existing key material
    pub fn with_key(backing_root: PathBuf, key: MasterKey) -> Self {
        MountContext { backing_root, key }
    }

    /// Get the backing root
    pub fn backing_root(&self) -> &Path {
        &self.backing_root
    }

    /// Get the master key
    pub fn key(&self) -> &MasterKey {
        &self.key
    }

    /// Map a virtual path to its backing path
    ///
    /// Plain concatenation of the backing root and the virtual path. No
    /// `..` normalization is performed.
    pub fn resolve(&self, virtual_path: &Path) -> PathBuf {
        let mut joined = OsString::from(self.backing_root.as_os_str());
        joined.push(virtual_path.as_os_str());
        PathBuf::from(joined)
    }
}

/// Validate a directory argument and canonicalize it
///
/// `what` names the argument in error messages.
pub fn resolve_directory_arg(arg: &str, what: &str) -> Result<PathBuf> {
    if arg.starts_with(OPTION_MARKER) {
        return Err(Error::Usage(format!(
            "The {} cannot start with '{}': {}",
            what, OPTION_MARKER, arg
        )));
    }

    let path = std::fs::canonicalize(arg).map_err(|e| {
        Error::Usage(format!("Please enter a valid directory for the {} ({}): {}", what, arg, e))
    })?;

    if !path.is_dir() {
        return Err(Error::Usage(format!(
            "The {} is not a directory: {}",
            what,
            path.display()
        )));
    }

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KEY_SIZE;
    use tempfile::tempdir;

    fn context(root: &str) -> MountContext {
        MountContext::with_key(PathBuf::from(root), MasterKey::from_bytes([0u8; KEY_SIZE]))
    }

    #[test]
    fn test_resolve_concatenates() {
        let ctx = context("/srv/mirror");
        assert_eq!(ctx.resolve(Path::new("/a")), PathBuf::from("/srv/mirror/a"));
        assert_eq!(
            ctx.resolve(Path::new("/dir/file.txt")),
            PathBuf::from("/srv/mirror/dir/file.txt")
        );
        assert_eq!(ctx.resolve(Path::new("/")), PathBuf::from("/srv/mirror/"));
    }

    #[test]
    fn test_resolve_does_not_normalize() {
        let ctx = context("/srv/mirror");
        assert_eq!(
            ctx.resolve(Path::new("/../etc")),
            PathBuf::from("/srv/mirror/../etc")
        );
    }

    #[test]
    fn test_empty_passphrase_is_usage_error() {
        assert!(matches!(Passphrase::new(String::new()), Err(Error::Usage(_))));
    }

    #[test]
    fn test_passphrase_debug_is_redacted() {
        let passphrase = Passphrase::new("hunter2".to_string()).unwrap();
        let rendered = format!("{:?}", passphrase);
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_context_from_passphrase() {
        let config = EncryptionConfig {
            argon2_memory_kib: 1024,
            argon2_iterations: 1,
            argon2_parallelism: 1,
            salt: Vec::new(),
        };
        let passphrase = Passphrase::new("secret".to_string()).unwrap();

        let a = MountContext::new(PathBuf::from("/tmp"), &passphrase, &config).unwrap();
        let b = MountContext::new(PathBuf::from("/tmp"), &passphrase, &config).unwrap();
        assert_eq!(a.key().key(), b.key().key());
        assert_eq!(a.backing_root(), Path::new("/tmp"));
    }

    #[test]
    fn test_directory_arg_rejects_option_marker() {
        let result = resolve_directory_arg("-mirror", "mirror directory");
        assert!(matches!(result, Err(Error::Usage(_))));
    }

    #[test]
    fn test_directory_arg_must_exist() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing");
        let result = resolve_directory_arg(missing.to_str().unwrap(), "mount point");
        assert!(matches!(result, Err(Error::Usage(_))));
    }

    #[test]
    fn test_directory_arg_must_be_directory() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("file");
        std::fs::write(&file, b"x").unwrap();
        let result = resolve_directory_arg(file.to_str().unwrap(), "mount point");
        assert!(matches!(result, Err(Error::Usage(_))));
    }

    #[test]
    fn test_directory_arg_is_canonical() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let arg = format!("{}/sub/../sub", dir.path().display());

        let resolved = resolve_directory_arg(&arg, "mirror directory").unwrap();
        assert_eq!(resolved, std::fs::canonicalize(dir.path().join("sub")).unwrap());
    }
}
