//! Mirror layer
//!
//! Every virtual path maps onto the backing directory by concatenation.
//! This module holds the engine shared by all requests and the passthrough
//! operations that forward to the backing file unchanged. The transparent
//! read and write paths live in [`super::pipeline`].

use crate::context::MountContext;
use crate::crypto::CipherGateway;
use crate::error::Result;
use crate::metadata::{self, EncryptionOracle};
use nix::sys::stat::{Mode, SFlag, UtimensatFlags};
use nix::sys::statvfs::Statvfs;
use nix::sys::time::TimeSpec;
use nix::unistd::AccessFlags;
use std::ffi::{OsStr, OsString};
use std::fs::{self, DirBuilder, File, Metadata, OpenOptions};
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::trace;

fn timespec(time: SystemTime) -> TimeSpec {
    match time.duration_since(UNIX_EPOCH) {
        Ok(since) => TimeSpec::from(since),
        Err(e) => {
            // Before the epoch: negative seconds, non-negative nanoseconds
            let before = e.duration();
            let nanos = before.subsec_nanos();
            let secs = -(before.as_secs() as libc::time_t);
            if nanos == 0 {
                TimeSpec::new(secs, 0)
            } else {
                TimeSpec::new(secs - 1, (1_000_000_000 - nanos) as _)
            }
        }
    }
}

/// One backing directory entry
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: OsString,
    pub kind: fuser::FileType,
}

/// Engine behind every filesystem request
pub struct MirrorLayer {
    ctx: Arc<MountContext>,
    gateway: Arc<dyn CipherGateway>,
    oracle: EncryptionOracle,
}

impl MirrorLayer {
    pub fn new(ctx: Arc<MountContext>, gateway: Arc<dyn CipherGateway>) -> Self {
        MirrorLayer {
            ctx,
            gateway,
            oracle: EncryptionOracle::new(),
        }
    }

    pub fn context(&self) -> &MountContext {
        &self.ctx
    }

    pub(crate) fn gateway(&self) -> &dyn CipherGateway {
        self.gateway.as_ref()
    }

    pub(crate) fn oracle(&self) -> &EncryptionOracle {
        &self.oracle
    }

    /// Backing path for a virtual path
    pub fn resolve(&self, virtual_path: &Path) -> PathBuf {
        self.ctx.resolve(virtual_path)
    }

    /// Whether the file at `virtual_path` is stored as ciphertext
    pub fn is_encrypted(&self, virtual_path: &Path) -> bool {
        self.oracle.is_encrypted(&self.resolve(virtual_path))
    }

    /// Attributes of the backing entry, symlinks not followed
    pub fn metadata(&self, virtual_path: &Path) -> Result<Metadata> {
        Ok(fs::symlink_metadata(self.resolve(virtual_path))?)
    }

    /// Size to report for a backing entry
    ///
    /// Ciphertext files report their plaintext length.
    pub fn reported_size(&self, virtual_path: &Path, meta: &Metadata) -> u64 {
        if meta.is_file() && self.is_encrypted(virtual_path) {
            self.gateway.plaintext_len(meta.len())
        } else {
            meta.len()
        }
    }

    /// List the entries of a backing directory, `.` and `..` excluded
    pub fn read_dir(&self, virtual_path: &Path) -> Result<Vec<DirEntry>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(self.resolve(virtual_path))? {
            let entry = entry?;
            let kind = match entry.file_type() {
                Ok(file_type) => super::inode::file_kind(file_type),
                Err(_) => fuser::FileType::RegularFile,
            };
            entries.push(DirEntry {
                name: entry.file_name(),
                kind,
            });
        }
        Ok(entries)
    }

    pub fn readlink(&self, virtual_path: &Path) -> Result<PathBuf> {
        Ok(fs::read_link(self.resolve(virtual_path))?)
    }

    pub fn mkdir(&self, virtual_path: &Path, mode: u32) -> Result<()> {
        DirBuilder::new()
            .mode(mode)
            .create(self.resolve(virtual_path))?;
        Ok(())
    }

    /// Create a special or regular file node
    ///
    /// Nodes made this way are never marked, so a regular file created via
    /// `mknod` stays plaintext.
    pub fn mknod(&self, virtual_path: &Path, mode: u32, rdev: u32) -> Result<()> {
        let kind = SFlag::from_bits_truncate(mode & libc::S_IFMT);
        let perm = Mode::from_bits_truncate(mode & 0o7777);
        nix::sys::stat::mknod(&self.resolve(virtual_path), kind, perm, rdev as libc::dev_t)?;
        Ok(())
    }

    pub fn unlink(&self, virtual_path: &Path) -> Result<()> {
        fs::remove_file(self.resolve(virtual_path))?;
        Ok(())
    }

    pub fn rmdir(&self, virtual_path: &Path) -> Result<()> {
        fs::remove_dir(self.resolve(virtual_path))?;
        Ok(())
    }

    /// Create a symlink at `virtual_path` whose content is `target` verbatim
    pub fn symlink(&self, target: &Path, virtual_path: &Path) -> Result<()> {
        std::os::unix::fs::symlink(target, self.resolve(virtual_path))?;
        Ok(())
    }

    /// Rename within the backing tree; the marker travels with the file
    pub fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        fs::rename(self.resolve(from), self.resolve(to))?;
        Ok(())
    }

    pub fn link(&self, existing: &Path, new_path: &Path) -> Result<()> {
        fs::hard_link(self.resolve(existing), self.resolve(new_path))?;
        Ok(())
    }

    pub fn chmod(&self, virtual_path: &Path, mode: u32) -> Result<()> {
        fs::set_permissions(
            self.resolve(virtual_path),
            fs::Permissions::from_mode(mode & 0o7777),
        )?;
        Ok(())
    }

    /// Change ownership without following symlinks
    pub fn chown(&self, virtual_path: &Path, uid: Option<u32>, gid: Option<u32>) -> Result<()> {
        std::os::unix::fs::lchown(self.resolve(virtual_path), uid, gid)?;
        Ok(())
    }

    /// Update access and/or modification times
    ///
    /// Works on the path without opening it and without following
    /// symlinks. A side left as `None` keeps its current value.
    pub fn set_times(
        &self,
        virtual_path: &Path,
        atime: Option<SystemTime>,
        mtime: Option<SystemTime>,
    ) -> Result<()> {
        if atime.is_none() && mtime.is_none() {
            return Ok(());
        }

        let atime = atime.map(timespec).unwrap_or(TimeSpec::UTIME_OMIT);
        let mtime = mtime.map(timespec).unwrap_or(TimeSpec::UTIME_OMIT);

        nix::sys::stat::utimensat(
            None,
            &self.resolve(virtual_path),
            &atime,
            &mtime,
            UtimensatFlags::NoFollowSymlink,
        )?;
        Ok(())
    }

    /// Check that the backing file can be opened with the access mode in `flags`
    pub fn open_check(&self, virtual_path: &Path, flags: i32) -> Result<()> {
        let mut options = OpenOptions::new();
        match flags & libc::O_ACCMODE {
            libc::O_WRONLY => options.write(true),
            libc::O_RDWR => options.read(true).write(true),
            _ => options.read(true),
        };
        options.open(self.resolve(virtual_path))?;
        trace!("open check passed for {:?} (flags={:#o})", virtual_path, flags);
        Ok(())
    }

    /// Flush the backing file to stable storage
    pub fn fsync(&self, virtual_path: &Path, datasync: bool) -> Result<()> {
        let file = File::open(self.resolve(virtual_path))?;
        if datasync {
            file.sync_data()?;
        } else {
            file.sync_all()?;
        }
        Ok(())
    }

    pub fn statfs(&self, virtual_path: &Path) -> Result<Statvfs> {
        Ok(nix::sys::statvfs::statvfs(&self.resolve(virtual_path))?)
    }

    /// `access(2)` against the backing path with the caller's mask
    pub fn access(&self, virtual_path: &Path, mask: i32) -> Result<()> {
        nix::unistd::access(
            &self.resolve(virtual_path),
            AccessFlags::from_bits_truncate(mask),
        )?;
        Ok(())
    }

    pub fn getxattr(&self, virtual_path: &Path, name: &OsStr) -> Result<Option<Vec<u8>>> {
        metadata::get_xattr(&self.resolve(virtual_path), name)
    }

    pub fn setxattr(&self, virtual_path: &Path, name: &OsStr, value: &[u8]) -> Result<()> {
        metadata::set_xattr(&self.resolve(virtual_path), name, value)
    }

    pub fn listxattr(&self, virtual_path: &Path) -> Result<Vec<OsString>> {
        metadata::list_xattrs(&self.resolve(virtual_path))
    }

    pub fn removexattr(&self, virtual_path: &Path, name: &OsStr) -> Result<()> {
        metadata::remove_xattr(&self.resolve(virtual_path), name)
    }
}
