//! Staging streams: transient plaintext buffers for ciphertext files
//!
//! A staging stream is an anonymous temporary file opened next to the
//! backing file it serves. It has no name in the backing tree and is
//! released when dropped, so every exit path of a pipeline cleans it up.

use crate::error::Result;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::FileExt;
use std::path::Path;
use tracing::debug;

/// Private scratch file owned by one pipeline invocation
pub struct StagingStream {
    file: File,
}

impl StagingStream {
    /// Create a staging stream in the directory holding `backing_path`
    ///
    /// Falls back to the system temporary directory when that directory
    /// refuses new files.
    pub fn beside(backing_path: &Path) -> Result<Self> {
        let dir = backing_path.parent().unwrap_or_else(|| Path::new("/"));

        let file = match tempfile::tempfile_in(dir) {
            Ok(file) => file,
            Err(e) => {
                debug!("Staging in {:?} failed ({}), using temp dir", dir, e);
                tempfile::tempfile()?
            }
        };

        Ok(StagingStream { file })
    }

    /// Current length in bytes
    pub fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Seek back to the start so the whole stream can be consumed
    pub fn rewind(&mut self) -> Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        Ok(())
    }

    /// Positioned read of up to `size` bytes
    pub fn read_at(&self, offset: u64, size: usize) -> Result<Vec<u8>> {
        Ok(read_at_most(&self.file, offset, size)?)
    }

    /// Positioned write, extending the stream as needed
    pub fn write_at(&self, data: &[u8], offset: u64) -> Result<()> {
        self.file.write_all_at(data, offset)?;
        Ok(())
    }

    /// Truncate or zero-extend
    pub fn set_len(&self, size: u64) -> Result<()> {
        self.file.set_len(size)?;
        Ok(())
    }
}

impl Read for StagingStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for StagingStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Read up to `size` bytes at `offset`, stopping early only at end of file
pub(crate) fn read_at_most(file: &File, offset: u64, size: usize) -> io::Result<Vec<u8>> {
    let mut buffer = vec![0u8; size];
    let mut filled = 0;

    while filled < size {
        match file.read_at(&mut buffer[filled..], offset + filled as u64) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    buffer.truncate(filled);
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn listing(dir: &Path) -> Vec<std::ffi::OsString> {
        let mut names: Vec<_> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_staging_is_invisible_and_released() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("file");
        std::fs::write(&target, b"x").unwrap();
        let before = listing(dir.path());

        {
            let mut staging = StagingStream::beside(&target).unwrap();
            staging.write_all(b"scratch").unwrap();
            assert_eq!(staging.len().unwrap(), 7);
        }

        assert_eq!(listing(dir.path()), before);
    }

    #[test]
    fn test_positioned_io() {
        let dir = tempdir().unwrap();
        let staging = StagingStream::beside(&dir.path().join("f")).unwrap();

        staging.write_at(b"hello", 0).unwrap();
        staging.write_at(b"XX", 1).unwrap();
        assert_eq!(staging.read_at(0, 5).unwrap(), b"hXXlo");
        assert_eq!(staging.read_at(3, 100).unwrap(), b"lo");
        assert!(staging.read_at(5, 10).unwrap().is_empty());
        assert!(staging.read_at(500, 10).unwrap().is_empty());
    }

    #[test]
    fn test_write_past_end_zero_fills() {
        let dir = tempdir().unwrap();
        let staging = StagingStream::beside(&dir.path().join("f")).unwrap();

        staging.write_at(b"ab", 4).unwrap();
        assert_eq!(staging.read_at(0, 6).unwrap(), b"\0\0\0\0ab");
    }

    #[test]
    fn test_rewind_reads_whole_stream() {
        let dir = tempdir().unwrap();
        let mut staging = StagingStream::beside(&dir.path().join("f")).unwrap();
        staging.write_all(b"content").unwrap();
        staging.rewind().unwrap();

        let mut all = Vec::new();
        staging.read_to_end(&mut all).unwrap();
        assert_eq!(all, b"content");
    }

    #[test]
    fn test_set_len() {
        let dir = tempdir().unwrap();
        let staging = StagingStream::beside(&dir.path().join("f")).unwrap();
        staging.write_at(b"abcdef", 0).unwrap();

        staging.set_len(3).unwrap();
        assert_eq!(staging.read_at(0, 10).unwrap(), b"abc");
        assert!(!staging.is_empty().unwrap());

        staging.set_len(0).unwrap();
        assert!(staging.is_empty().unwrap());
    }
}
