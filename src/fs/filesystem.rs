//! FUSE bridge for the mirror
//!
//! Translates inode-addressed kernel requests into virtual paths and hands
//! them to the [`MirrorLayer`].

use super::inode::{file_attr, InodeTable, ROOT_INO};
use super::mirror::MirrorLayer;
use crate::error::{Error, Result};
use crate::metadata::encode_name_list;

use fuser::{
    FileAttr, Filesystem, KernelConfig, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, ReplyXattr, Request, TimeOrNow,
};
use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, error, info};

/// Errno for a missing extended attribute
#[cfg(target_os = "macos")]
const NO_XATTR: libc::c_int = libc::ENOATTR;
#[cfg(not(target_os = "macos"))]
const NO_XATTR: libc::c_int = libc::ENODATA;

fn resolve_time(time: TimeOrNow) -> SystemTime {
    match time {
        TimeOrNow::SpecificTime(t) => t,
        TimeOrNow::Now => SystemTime::now(),
    }
}

/// Mounted mirror filesystem
pub struct XcryptFs {
    /// Core engine
    mirror: MirrorLayer,
    /// Virtual inode table
    inodes: InodeTable,
    /// Attribute and entry cache timeout
    ttl: Duration,
    /// Next file handle
    next_fh: u64,
}

impl XcryptFs {
    pub fn new(mirror: MirrorLayer, ttl: Duration) -> Self {
        XcryptFs {
            mirror,
            inodes: InodeTable::new(),
            ttl,
            next_fh: 1,
        }
    }

    fn path_of(&self, ino: u64) -> Result<PathBuf> {
        self.inodes.path(ino).ok_or(Error::InodeNotFound(ino))
    }

    fn child_of(&self, parent: u64, name: &OsStr) -> Result<PathBuf> {
        self.inodes
            .child_path(parent, name)
            .ok_or(Error::InodeNotFound(parent))
    }

    /// Attributes for `path`, registering its inode
    fn attr_for(&self, path: &Path) -> Result<FileAttr> {
        let meta = self.mirror.metadata(path)?;
        let ino = self.inodes.get_or_insert(path);
        let size = self.mirror.reported_size(path, &meta);
        Ok(file_attr(ino, &meta, size))
    }

    fn alloc_fh(&mut self) -> u64 {
        let fh = self.next_fh;
        self.next_fh = self.next_fh.wrapping_add(1).max(1);
        fh
    }

    /// Open flags for the reply
    ///
    /// Ciphertext files bypass the page cache so the kernel never merges
    /// its own view of the file with the stored ciphertext length.
    fn open_flags(&self, path: &Path) -> u32 {
        if self.mirror.is_encrypted(path) {
            fuser::consts::FOPEN_DIRECT_IO
        } else {
            0
        }
    }

    fn apply_setattr(
        &self,
        path: &Path,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
    ) -> Result<FileAttr> {
        if let Some(mode) = mode {
            self.mirror.chmod(path, mode)?;
        }
        if uid.is_some() || gid.is_some() {
            self.mirror.chown(path, uid, gid)?;
        }
        if let Some(size) = size {
            self.mirror.truncate(path, size)?;
        }
        if atime.is_some() || mtime.is_some() {
            self.mirror
                .set_times(path, atime.map(resolve_time), mtime.map(resolve_time))?;
        }
        self.attr_for(path)
    }

    fn rename_entry(
        &self,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
    ) -> Result<()> {
        let from = self.child_of(parent, name)?;
        let to = self.child_of(newparent, newname)?;
        self.mirror.rename(&from, &to)?;
        self.inodes.rename(&from, &to);
        Ok(())
    }
}

impl Filesystem for XcryptFs {
    fn init(
        &mut self,
        _req: &Request,
        _config: &mut KernelConfig,
    ) -> std::result::Result<(), libc::c_int> {
        info!(
            "Serving mirror of {:?}",
            self.mirror.context().backing_root()
        );
        Ok(())
    }

    fn destroy(&mut self) {
        info!("Filesystem unmounted ({} inodes tracked)", self.inodes.len());
    }

    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        debug!("lookup(parent={}, name={:?})", parent, name);

        match self.child_of(parent, name).and_then(|p| self.attr_for(&p)) {
            Ok(attr) => reply.entry(&self.ttl, &attr, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn getattr(&mut self, _req: &Request, ino: u64, reply: ReplyAttr) {
        debug!("getattr(ino={})", ino);

        match self.path_of(ino).and_then(|p| self.attr_for(&p)) {
            Ok(attr) => reply.attr(&self.ttl, &attr),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        debug!(
            "setattr(ino={}, mode={:?}, uid={:?}, gid={:?}, size={:?})",
            ino, mode, uid, gid, size
        );

        let result = self
            .path_of(ino)
            .and_then(|p| self.apply_setattr(&p, mode, uid, gid, size, atime, mtime));

        match result {
            Ok(attr) => reply.attr(&self.ttl, &attr),
            Err(e) => {
                error!("setattr failed for ino {}: {}", ino, e);
                reply.error(e.to_errno());
            }
        }
    }

    fn readlink(&mut self, _req: &Request, ino: u64, reply: ReplyData) {
        debug!("readlink(ino={})", ino);

        match self.path_of(ino).and_then(|p| self.mirror.readlink(&p)) {
            Ok(target) => reply.data(target.as_os_str().as_bytes()),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn mknod(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        rdev: u32,
        reply: ReplyEntry,
    ) {
        debug!("mknod(parent={}, name={:?}, mode={:o})", parent, name, mode);

        let result = self.child_of(parent, name).and_then(|p| {
            self.mirror.mknod(&p, mode & !umask, rdev)?;
            self.attr_for(&p)
        });

        match result {
            Ok(attr) => reply.entry(&self.ttl, &attr, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        reply: ReplyEntry,
    ) {
        debug!("mkdir(parent={}, name={:?}, mode={:o})", parent, name, mode);

        let result = self.child_of(parent, name).and_then(|p| {
            self.mirror.mkdir(&p, mode & !umask & 0o7777)?;
            self.attr_for(&p)
        });

        match result {
            Ok(attr) => reply.entry(&self.ttl, &attr, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn unlink(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        debug!("unlink(parent={}, name={:?})", parent, name);

        match self.child_of(parent, name).and_then(|p| {
            self.mirror.unlink(&p)?;
            self.inodes.forget(&p);
            Ok(())
        }) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn rmdir(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        debug!("rmdir(parent={}, name={:?})", parent, name);

        match self.child_of(parent, name).and_then(|p| {
            self.mirror.rmdir(&p)?;
            self.inodes.forget(&p);
            Ok(())
        }) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn symlink(
        &mut self,
        _req: &Request,
        parent: u64,
        link_name: &OsStr,
        target: &Path,
        reply: ReplyEntry,
    ) {
        debug!("symlink(parent={}, name={:?}, target={:?})", parent, link_name, target);

        let result = self.child_of(parent, link_name).and_then(|p| {
            self.mirror.symlink(target, &p)?;
            self.attr_for(&p)
        });

        match result {
            Ok(attr) => reply.entry(&self.ttl, &attr, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn rename(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
        reply: ReplyEmpty,
    ) {
        debug!(
            "rename(parent={}, name={:?}, newparent={}, newname={:?}, flags={})",
            parent, name, newparent, newname, flags
        );

        // RENAME_NOREPLACE / RENAME_EXCHANGE are not forwarded
        if flags != 0 {
            reply.error(libc::EINVAL);
            return;
        }

        match self.rename_entry(parent, name, newparent, newname) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn link(
        &mut self,
        _req: &Request,
        ino: u64,
        newparent: u64,
        newname: &OsStr,
        reply: ReplyEntry,
    ) {
        debug!("link(ino={}, newparent={}, newname={:?})", ino, newparent, newname);

        let result = self.path_of(ino).and_then(|existing| {
            let new_path = self.child_of(newparent, newname)?;
            self.mirror.link(&existing, &new_path)?;
            self.attr_for(&new_path)
        });

        match result {
            Ok(attr) => reply.entry(&self.ttl, &attr, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn open(&mut self, _req: &Request, ino: u64, flags: i32, reply: ReplyOpen) {
        debug!("open(ino={}, flags={:#o})", ino, flags);

        let path = match self.path_of(ino) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e.to_errno());
                return;
            }
        };

        if let Err(e) = self.mirror.open_check(&path, flags) {
            reply.error(e.to_errno());
            return;
        }

        let open_flags = self.open_flags(&path);
        let fh = self.alloc_fh();
        reply.opened(fh, open_flags);
    }

    fn read(
        &mut self,
        _req: &Request,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        debug!("read(ino={}, fh={}, offset={}, size={})", ino, fh, offset, size);

        match self
            .path_of(ino)
            .and_then(|p| self.mirror.read(&p, offset, size))
        {
            Ok(data) => reply.data(&data),
            Err(e) => {
                error!("read failed for ino {}: {}", ino, e);
                reply.error(e.to_errno());
            }
        }
    }

    fn write(
        &mut self,
        _req: &Request,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        debug!(
            "write(ino={}, fh={}, offset={}, size={})",
            ino,
            fh,
            offset,
            data.len()
        );

        match self
            .path_of(ino)
            .and_then(|p| self.mirror.write(&p, offset, data))
        {
            Ok(written) => reply.written(written as u32),
            Err(e) => {
                error!("write failed for ino {}: {}", ino, e);
                reply.error(e.to_errno());
            }
        }
    }

    fn flush(&mut self, _req: &Request, ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        debug!("flush(ino={}, fh={})", ino, fh);
        // Every write already reached the backing file
        reply.ok();
    }

    fn release(
        &mut self,
        _req: &Request,
        ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        debug!("release(ino={}, fh={})", ino, fh);
        reply.ok();
    }

    fn fsync(&mut self, _req: &Request, ino: u64, fh: u64, datasync: bool, reply: ReplyEmpty) {
        debug!("fsync(ino={}, fh={}, datasync={})", ino, fh, datasync);

        match self
            .path_of(ino)
            .and_then(|p| self.mirror.fsync(&p, datasync))
        {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn opendir(&mut self, _req: &Request, ino: u64, _flags: i32, reply: ReplyOpen) {
        debug!("opendir(ino={})", ino);

        match self.path_of(ino).and_then(|p| self.mirror.metadata(&p)) {
            Ok(meta) if meta.is_dir() => {
                let fh = self.alloc_fh();
                reply.opened(fh, 0);
            }
            Ok(_) => reply.error(libc::ENOTDIR),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        debug!("readdir(ino={}, offset={})", ino, offset);

        let path = match self.path_of(ino) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e.to_errno());
                return;
            }
        };

        let children = match self.mirror.read_dir(&path) {
            Ok(c) => c,
            Err(e) => {
                reply.error(e.to_errno());
                return;
            }
        };

        let parent_ino = match path.parent() {
            Some(parent) => self.inodes.get_or_insert(parent),
            None => ROOT_INO,
        };

        let mut entries = vec![
            (ino, fuser::FileType::Directory, OsString::from(".")),
            (parent_ino, fuser::FileType::Directory, OsString::from("..")),
        ];
        for child in children {
            let child_ino = self.inodes.get_or_insert(&path.join(&child.name));
            entries.push((child_ino, child.kind, child.name));
        }

        for (i, (entry_ino, kind, name)) in
            entries.into_iter().enumerate().skip(offset.max(0) as usize)
        {
            if reply.add(entry_ino, (i + 1) as i64, kind, &name) {
                break;
            }
        }

        reply.ok();
    }

    fn releasedir(&mut self, _req: &Request, ino: u64, fh: u64, _flags: i32, reply: ReplyEmpty) {
        debug!("releasedir(ino={}, fh={})", ino, fh);
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request, ino: u64, reply: ReplyStatfs) {
        debug!("statfs(ino={})", ino);

        let path = self.inodes.path(ino).unwrap_or_else(|| PathBuf::from("/"));
        match self.mirror.statfs(&path) {
            Ok(stats) => reply.statfs(
                stats.blocks() as u64,
                stats.blocks_free() as u64,
                stats.blocks_available() as u64,
                stats.files() as u64,
                stats.files_free() as u64,
                stats.block_size() as u32,
                stats.name_max() as u32,
                stats.fragment_size() as u32,
            ),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn setxattr(
        &mut self,
        _req: &Request,
        ino: u64,
        name: &OsStr,
        value: &[u8],
        flags: i32,
        _position: u32,
        reply: ReplyEmpty,
    ) {
        debug!("setxattr(ino={}, name={:?}, size={})", ino, name, value.len());

        let result = self.path_of(ino).and_then(|p| {
            if flags & (libc::XATTR_CREATE | libc::XATTR_REPLACE) != 0 {
                let exists = self.mirror.getxattr(&p, name)?.is_some();
                if flags & libc::XATTR_CREATE != 0 && exists {
                    return Err(Error::Io(std::io::Error::from_raw_os_error(libc::EEXIST)));
                }
                if flags & libc::XATTR_REPLACE != 0 && !exists {
                    return Err(Error::Io(std::io::Error::from_raw_os_error(NO_XATTR)));
                }
            }
            self.mirror.setxattr(&p, name, value)
        });

        match result {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn getxattr(&mut self, _req: &Request, ino: u64, name: &OsStr, size: u32, reply: ReplyXattr) {
        debug!("getxattr(ino={}, name={:?}, size={})", ino, name, size);

        match self.path_of(ino).and_then(|p| self.mirror.getxattr(&p, name)) {
            Ok(Some(value)) => {
                if size == 0 {
                    reply.size(value.len() as u32);
                } else if size >= value.len() as u32 {
                    reply.data(&value);
                } else {
                    reply.error(libc::ERANGE);
                }
            }
            Ok(None) => reply.error(NO_XATTR),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn listxattr(&mut self, _req: &Request, ino: u64, size: u32, reply: ReplyXattr) {
        debug!("listxattr(ino={}, size={})", ino, size);

        match self.path_of(ino).and_then(|p| self.mirror.listxattr(&p)) {
            Ok(names) => {
                let data = encode_name_list(&names);
                if size == 0 {
                    reply.size(data.len() as u32);
                } else if size >= data.len() as u32 {
                    reply.data(&data);
                } else {
                    reply.error(libc::ERANGE);
                }
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn removexattr(&mut self, _req: &Request, ino: u64, name: &OsStr, reply: ReplyEmpty) {
        debug!("removexattr(ino={}, name={:?})", ino, name);

        match self
            .path_of(ino)
            .and_then(|p| self.mirror.removexattr(&p, name))
        {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn access(&mut self, _req: &Request, ino: u64, mask: i32, reply: ReplyEmpty) {
        debug!("access(ino={}, mask={})", ino, mask);

        match self.path_of(ino).and_then(|p| self.mirror.access(&p, mask)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn create(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        debug!(
            "create(parent={}, name={:?}, mode={:o}, flags={:#o})",
            parent, name, mode, flags
        );

        let result = self.child_of(parent, name).and_then(|p| {
            let marked = self.mirror.create(&p, mode & !umask & 0o7777)?;
            Ok((self.attr_for(&p)?, marked))
        });

        match result {
            Ok((attr, marked)) => {
                let open_flags = if marked {
                    fuser::consts::FOPEN_DIRECT_IO
                } else {
                    0
                };
                let fh = self.alloc_fh();
                reply.created(&self.ttl, &attr, 0, fh, open_flags);
            }
            Err(e) => {
                error!("create failed for {:?}: {}", name, e);
                reply.error(e.to_errno());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{mirror_with, XorGateway};
    use tempfile::tempdir;

    fn filesystem(root: &Path) -> XcryptFs {
        XcryptFs::new(mirror_with(root, XorGateway::default()), Duration::from_secs(1))
    }

    #[test]
    fn test_attr_for_registers_inode() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("f"), b"12345").unwrap();
        let fs = filesystem(dir.path());

        let path = fs.child_of(ROOT_INO, OsStr::new("f")).unwrap();
        let attr = fs.attr_for(&path).unwrap();

        assert_eq!(attr.size, 5);
        assert_eq!(fs.path_of(attr.ino).unwrap(), PathBuf::from("/f"));
        assert_eq!(fs.attr_for(&path).unwrap().ino, attr.ino);
    }

    #[test]
    fn test_unknown_inode_is_enoent() {
        let dir = tempdir().unwrap();
        let fs = filesystem(dir.path());

        assert_eq!(fs.path_of(999).unwrap_err().to_errno(), libc::ENOENT);
    }

    #[test]
    fn test_setattr_truncates_and_chmods() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("f"), b"123456").unwrap();
        let fs = filesystem(dir.path());
        let path = PathBuf::from("/f");

        let attr = fs
            .apply_setattr(&path, Some(0o600), None, None, Some(2), None, None)
            .unwrap();
        assert_eq!(attr.size, 2);
        assert_eq!(attr.perm, 0o600);
    }

    #[test]
    fn test_rename_keeps_inode() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("old"), b"x").unwrap();
        let fs = filesystem(dir.path());
        let ino = fs.attr_for(Path::new("/old")).unwrap().ino;

        fs.rename_entry(ROOT_INO, OsStr::new("old"), ROOT_INO, OsStr::new("new"))
            .unwrap();

        assert_eq!(fs.path_of(ino).unwrap(), PathBuf::from("/new"));
        assert!(dir.path().join("new").exists());
    }

    #[test]
    fn test_plaintext_file_keeps_page_cache() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("plain"), b"x").unwrap();
        let fs = filesystem(dir.path());

        assert_eq!(fs.open_flags(Path::new("/plain")), 0);
    }
}
