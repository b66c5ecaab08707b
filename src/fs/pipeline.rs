//! Transparent read and write pipelines
//!
//! Plaintext files are served with positioned I/O straight on the backing
//! file. Ciphertext files have no range semantics, so each request
//! materializes the whole plaintext in a [`StagingStream`], works on it
//! there, and for mutations seals it into a second staging stream before
//! the backing file is touched. A gateway failure therefore never reaches
//! the backing file, and space for the new ciphertext is reserved before
//! the old ciphertext is overwritten.

use super::mirror::MirrorLayer;
use super::staging::{read_at_most, StagingStream};
use crate::crypto::Direction;
use crate::error::{Error, Result};
use nix::errno::Errno;
use nix::fcntl::{fallocate, FallocateFlags};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::os::unix::io::AsRawFd;
use std::path::Path;
use tracing::{debug, trace, warn};

fn checked_offset(offset: i64) -> Result<u64> {
    u64::try_from(offset).map_err(|_| Error::InvalidOffset(offset))
}

impl MirrorLayer {
    /// Read up to `size` bytes at `offset`
    ///
    /// Returns fewer bytes at end of file and none past it.
    pub fn read(&self, virtual_path: &Path, offset: i64, size: u32) -> Result<Vec<u8>> {
        let offset = checked_offset(offset)?;
        let backing = self.resolve(virtual_path);
        let file = File::open(&backing)?;

        if !self.oracle().is_encrypted(&backing) {
            return Ok(read_at_most(&file, offset, size as usize)?);
        }

        let plaintext = self.decrypt_to_staging(&backing, file)?;
        plaintext.read_at(offset, size as usize)
    }

    /// Write `data` at `offset`, returning the number of bytes written
    pub fn write(&self, virtual_path: &Path, offset: i64, data: &[u8]) -> Result<usize> {
        let offset = checked_offset(offset)?;
        if data.is_empty() {
            return Ok(0);
        }

        let backing = self.resolve(virtual_path);

        if !self.oracle().is_encrypted(&backing) {
            let file = OpenOptions::new().write(true).open(&backing)?;
            file.write_all_at(data, offset)?;
            return Ok(data.len());
        }

        let plaintext = self.decrypt_to_staging(&backing, File::open(&backing)?)?;
        plaintext.write_at(data, offset)?;
        self.seal_into(&backing, plaintext)?;

        trace!("Sealed {} bytes at {} into {:?}", data.len(), offset, virtual_path);
        Ok(data.len())
    }

    /// Set the plaintext length of a file
    pub fn truncate(&self, virtual_path: &Path, size: u64) -> Result<()> {
        let backing = self.resolve(virtual_path);

        // An empty stream is the encoding of empty plaintext
        if size == 0 || !self.oracle().is_encrypted(&backing) {
            OpenOptions::new().write(true).open(&backing)?.set_len(size)?;
            return Ok(());
        }

        let plaintext = self.decrypt_to_staging(&backing, File::open(&backing)?)?;
        if plaintext.len()? == size {
            return Ok(());
        }

        plaintext.set_len(size)?;
        self.seal_into(&backing, plaintext)
    }

    /// Create an empty file and mark it encrypted
    ///
    /// Returns whether the file ended up marked. A file that already existed
    /// keeps its current state. Failing to persist the marker leaves a
    /// plaintext file behind and is not an error.
    pub fn create(&self, virtual_path: &Path, mode: u32) -> Result<bool> {
        let backing = self.resolve(virtual_path);
        let existed = fs::symlink_metadata(&backing).is_ok();

        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(mode)
            .open(&backing)?;

        if existed {
            debug!("create on existing {:?}, marker left as is", virtual_path);
            return Ok(self.oracle().is_encrypted(&backing));
        }

        match self.oracle().mark_encrypted(&backing) {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!(
                    "Could not mark {:?} as encrypted, it will be stored as plaintext: {}",
                    virtual_path, e
                );
                Ok(false)
            }
        }
    }

    /// Decrypt the whole backing file into a fresh staging stream
    fn decrypt_to_staging(&self, backing: &Path, mut source: File) -> Result<StagingStream> {
        let mut staging = StagingStream::beside(backing)?;

        if source.metadata()?.len() > 0 {
            self.gateway().transform(
                &mut source,
                &mut staging,
                Direction::Decrypt,
                self.context().key(),
            )?;
        }

        Ok(staging)
    }

    /// Encrypt `plaintext` and replace the backing file's content with it
    ///
    /// The backing file is opened for overwrite only after encryption has
    /// fully succeeded and is rewritten in place, so its inode, ownership,
    /// links and extended attributes are kept.
    fn seal_into(&self, backing: &Path, mut plaintext: StagingStream) -> Result<()> {
        plaintext.rewind()?;

        let mut sealed = StagingStream::beside(backing)?;
        self.gateway().transform(
            &mut plaintext,
            &mut sealed,
            Direction::Encrypt,
            self.context().key(),
        )?;
        let sealed_len = sealed.len()?;
        sealed.rewind()?;

        let mut target = OpenOptions::new().write(true).open(backing)?;
        reserve(&target, sealed_len)?;
        io::copy(&mut sealed, &mut target)?;
        target.set_len(sealed_len)?;
        Ok(())
    }
}

/// Allocate the first `len` bytes of `file` before it is overwritten
///
/// Running out of space then fails here, with the old content intact,
/// instead of partway through the copy. Filesystems without `fallocate`
/// are overwritten without a reservation.
fn reserve(file: &File, len: u64) -> Result<()> {
    if len == 0 {
        return Ok(());
    }

    let len = libc::off_t::try_from(len).map_err(|_| Error::Sys(Errno::EFBIG))?;
    match fallocate(file.as_raw_fd(), FallocateFlags::empty(), 0, len) {
        Ok(()) => Ok(()),
        Err(Errno::EOPNOTSUPP) => {
            trace!("fallocate unsupported, overwriting without reservation");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
