//! Inode bookkeeping for the mirror
//!
//! The kernel addresses files by inode number while the backing tree is
//! addressed by path. This table hands out stable virtual inode numbers
//! for virtual paths and keeps them in step with renames and removals.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs::Metadata;
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Root directory inode
pub const ROOT_INO: u64 = 1;

/// Maps virtual inode numbers to virtual paths and back
pub struct InodeTable {
    /// Next virtual inode number
    next_ino: AtomicU64,
    /// Virtual ino -> virtual path
    paths: RwLock<HashMap<u64, PathBuf>>,
    /// Virtual path -> virtual ino
    inos: RwLock<HashMap<PathBuf, u64>>,
}

impl InodeTable {
    pub fn new() -> Self {
        let table = Self {
            next_ino: AtomicU64::new(ROOT_INO + 1),
            paths: RwLock::new(HashMap::new()),
            inos: RwLock::new(HashMap::new()),
        };

        let root = PathBuf::from("/");
        table.paths.write().insert(ROOT_INO, root.clone());
        table.inos.write().insert(root, ROOT_INO);

        table
    }

    /// Virtual path of `ino`
    pub fn path(&self, ino: u64) -> Option<PathBuf> {
        self.paths.read().get(&ino).cloned()
    }

    /// Virtual path of `name` inside directory `parent`
    pub fn child_path(&self, parent: u64, name: &OsStr) -> Option<PathBuf> {
        self.path(parent).map(|dir| dir.join(name))
    }

    /// Inode number for `path`, allocating one on first sight
    pub fn get_or_insert(&self, path: &Path) -> u64 {
        if let Some(ino) = self.inos.read().get(path) {
            return *ino;
        }

        let mut inos = self.inos.write();
        // Another caller may have raced us between the locks
        if let Some(ino) = inos.get(path) {
            return *ino;
        }

        let ino = self.next_ino.fetch_add(1, Ordering::SeqCst);
        inos.insert(path.to_path_buf(), ino);
        self.paths.write().insert(ino, path.to_path_buf());
        ino
    }

    /// Drop the mapping for a removed path
    pub fn forget(&self, path: &Path) {
        if let Some(ino) = self.inos.write().remove(path) {
            self.paths.write().remove(&ino);
        }
    }

    /// Move `from` and everything below it to `to`
    ///
    /// A mapping already held by the destination is replaced, matching
    /// rename's overwrite semantics.
    pub fn rename(&self, from: &Path, to: &Path) {
        let mut inos = self.inos.write();
        let mut paths = self.paths.write();

        if let Some(ino) = inos.remove(to) {
            paths.remove(&ino);
        }

        let moved: Vec<(PathBuf, u64)> = inos
            .iter()
            .filter(|(path, _)| path.starts_with(from))
            .map(|(path, ino)| (path.clone(), *ino))
            .collect();

        for (old_path, ino) in moved {
            let new_path = match old_path.strip_prefix(from) {
                Ok(rest) if rest.as_os_str().is_empty() => to.to_path_buf(),
                Ok(rest) => to.join(rest),
                Err(_) => continue,
            };
            inos.remove(&old_path);
            inos.insert(new_path.clone(), ino);
            paths.insert(ino, new_path);
        }
    }

    /// Number of tracked inodes, root included
    pub fn len(&self) -> usize {
        self.paths.read().len()
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Map a backing file type to the FUSE kind
pub fn file_kind(file_type: std::fs::FileType) -> fuser::FileType {
    if file_type.is_dir() {
        fuser::FileType::Directory
    } else if file_type.is_symlink() {
        fuser::FileType::Symlink
    } else if file_type.is_block_device() {
        fuser::FileType::BlockDevice
    } else if file_type.is_char_device() {
        fuser::FileType::CharDevice
    } else if file_type.is_fifo() {
        fuser::FileType::NamedPipe
    } else if file_type.is_socket() {
        fuser::FileType::Socket
    } else {
        fuser::FileType::RegularFile
    }
}

fn timestamp(secs: i64, nsecs: i64) -> SystemTime {
    if secs >= 0 {
        UNIX_EPOCH + Duration::new(secs as u64, nsecs as u32)
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs())
    }
}

/// Build kernel attributes from backing metadata
///
/// `size` is the size the mount reports, which differs from the backing
/// length for ciphertext files.
pub fn file_attr(ino: u64, meta: &Metadata, size: u64) -> fuser::FileAttr {
    fuser::FileAttr {
        ino,
        size,
        blocks: meta.blocks(),
        atime: timestamp(meta.atime(), meta.atime_nsec()),
        mtime: timestamp(meta.mtime(), meta.mtime_nsec()),
        ctime: timestamp(meta.ctime(), meta.ctime_nsec()),
        crtime: meta.created().unwrap_or(UNIX_EPOCH),
        kind: file_kind(meta.file_type()),
        perm: (meta.mode() & 0o7777) as u16,
        nlink: meta.nlink() as u32,
        uid: meta.uid(),
        gid: meta.gid(),
        rdev: meta.rdev() as u32,
        blksize: meta.blksize() as u32,
        flags: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_root_is_registered() {
        let table = InodeTable::new();
        assert_eq!(table.path(ROOT_INO), Some(PathBuf::from("/")));
        assert_eq!(table.get_or_insert(Path::new("/")), ROOT_INO);
        assert_eq!(
            table.child_path(ROOT_INO, OsStr::new("a.txt")),
            Some(PathBuf::from("/a.txt"))
        );
    }

    #[test]
    fn test_inode_numbers_are_stable() {
        let table = InodeTable::new();
        let a = table.get_or_insert(Path::new("/a"));
        let b = table.get_or_insert(Path::new("/b"));

        assert_ne!(a, b);
        assert_ne!(a, ROOT_INO);
        assert_eq!(table.get_or_insert(Path::new("/a")), a);
        assert_eq!(table.path(b), Some(PathBuf::from("/b")));
    }

    #[test]
    fn test_forget() {
        let table = InodeTable::new();
        let ino = table.get_or_insert(Path::new("/gone"));
        table.forget(Path::new("/gone"));

        assert!(table.path(ino).is_none());
        assert_ne!(table.get_or_insert(Path::new("/gone")), ino);
    }

    #[test]
    fn test_rename_moves_subtree() {
        let table = InodeTable::new();
        let dir = table.get_or_insert(Path::new("/dir"));
        let file = table.get_or_insert(Path::new("/dir/file"));
        let sibling = table.get_or_insert(Path::new("/dirty"));

        table.rename(Path::new("/dir"), Path::new("/moved"));

        assert_eq!(table.path(dir), Some(PathBuf::from("/moved")));
        assert_eq!(table.path(file), Some(PathBuf::from("/moved/file")));
        assert_eq!(table.path(sibling), Some(PathBuf::from("/dirty")));
    }

    #[test]
    fn test_rename_replaces_destination() {
        let table = InodeTable::new();
        let src = table.get_or_insert(Path::new("/src"));
        let dst = table.get_or_insert(Path::new("/dst"));

        table.rename(Path::new("/src"), Path::new("/dst"));

        assert_eq!(table.path(src), Some(PathBuf::from("/dst")));
        assert!(table.path(dst).is_none());
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_file_attr_from_metadata() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"12345").unwrap();
        let meta = std::fs::metadata(&path).unwrap();

        let attr = file_attr(42, &meta, 3);
        assert_eq!(attr.ino, 42);
        assert_eq!(attr.size, 3);
        assert_eq!(attr.kind, fuser::FileType::RegularFile);
        assert_eq!(attr.uid, meta.uid());

        let dir_meta = std::fs::metadata(dir.path()).unwrap();
        assert_eq!(file_kind(dir_meta.file_type()), fuser::FileType::Directory);
    }
}
