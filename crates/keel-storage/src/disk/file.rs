//! File-backed disk manager.
//!
//! Pages live at `page_id * page_size` inside a single data file. I/O is
//! positional (`pread`/`pwrite`), so concurrent readers and writers never
//! contend on a shared cursor.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use keel_common::types::PageId;

use super::error::{IoError, IoResult};
use super::DiskManager;

#[cfg(unix)]
use std::os::unix::fs::FileExt;
#[cfg(windows)]
use std::os::windows::fs::FileExt;

/// Disk manager backed by a single data file.
pub struct FileDiskManager {
    file: File,
    path: PathBuf,
    page_size: usize,
}

impl FileDiskManager {
    /// Opens (or creates) the data file at `path`.
    pub fn open(path: impl AsRef<Path>, page_size: usize) -> IoResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .map_err(|e| IoError::open(&path, e))?;

        Ok(Self {
            file,
            path,
            page_size,
        })
    }

    /// Returns the path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the page size this manager was opened with.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    fn check_args(&self, page_id: PageId, len: usize) -> IoResult<u64> {
        if !page_id.is_valid() {
            return Err(IoError::InvalidPageId);
        }
        if len != self.page_size {
            return Err(IoError::BufferLength {
                expected: self.page_size,
                actual: len,
            });
        }
        Ok(u64::from(page_id.as_u32()) * self.page_size as u64)
    }

    #[cfg(unix)]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
        self.file.read_at(buf, offset)
    }

    #[cfg(windows)]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
        self.file.seek_read(buf, offset)
    }

    #[cfg(unix)]
    fn write_all_at(&self, data: &[u8], offset: u64) -> std::io::Result<()> {
        self.file.write_all_at(data, offset)
    }

    #[cfg(windows)]
    fn write_all_at(&self, mut data: &[u8], mut offset: u64) -> std::io::Result<()> {
        while !data.is_empty() {
            let n = self.file.seek_write(data, offset)?;
            data = &data[n..];
            offset += n as u64;
        }
        Ok(())
    }
}

impl DiskManager for FileDiskManager {
    fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> IoResult<()> {
        let offset = self.check_args(page_id, buf.len())?;

        // Read up to a full page; anything past EOF reads as zeroes, so a
        // never-written page comes back blank rather than erroring.
        let mut filled = 0;
        while filled < buf.len() {
            match self.read_at(&mut buf[filled..], offset + filled as u64) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        buf[filled..].fill(0);
        Ok(())
    }

    fn write_page(&self, page_id: PageId, data: &[u8]) -> IoResult<()> {
        let offset = self.check_args(page_id, data.len())?;
        self.write_all_at(data, offset)?;
        Ok(())
    }

    fn sync(&self) -> IoResult<()> {
        self.file.sync_data()?;
        Ok(())
    }
}

impl std::fmt::Debug for FileDiskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileDiskManager")
            .field("path", &self.path)
            .field("page_size", &self.page_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const PAGE_SIZE: usize = 4096;

    fn open_manager(dir: &tempfile::TempDir) -> FileDiskManager {
        FileDiskManager::open(dir.path().join("test.db"), PAGE_SIZE).unwrap()
    }

    #[test]
    fn test_write_read_round_trip() {
        let dir = tempdir().unwrap();
        let disk = open_manager(&dir);

        let mut page = vec![0u8; PAGE_SIZE];
        page[0..4].copy_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
        disk.write_page(PageId::new(3), &page).unwrap();

        let mut out = vec![0u8; PAGE_SIZE];
        disk.read_page(PageId::new(3), &mut out).unwrap();
        assert_eq!(out, page);
    }

    #[test]
    fn test_never_written_page_reads_zeroes() {
        let dir = tempdir().unwrap();
        let disk = open_manager(&dir);

        let mut out = vec![0xFFu8; PAGE_SIZE];
        disk.read_page(PageId::new(12), &mut out).unwrap();
        assert!(out.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_partial_tail_page_is_zero_filled() {
        let dir = tempdir().unwrap();
        let disk = open_manager(&dir);

        // Writing page 0 leaves page 1 entirely past EOF; page 0 re-reads
        // intact while page 1 reads as zeroes.
        let page = vec![0xABu8; PAGE_SIZE];
        disk.write_page(PageId::new(0), &page).unwrap();

        let mut out = vec![0xFFu8; PAGE_SIZE];
        disk.read_page(PageId::new(1), &mut out).unwrap();
        assert!(out.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_buffer_length_mismatch() {
        let dir = tempdir().unwrap();
        let disk = open_manager(&dir);

        let mut short = vec![0u8; 100];
        let err = disk.read_page(PageId::new(0), &mut short).unwrap_err();
        assert!(matches!(err, IoError::BufferLength { expected, actual }
            if expected == PAGE_SIZE && actual == 100));
    }

    #[test]
    fn test_invalid_page_id_rejected() {
        let dir = tempdir().unwrap();
        let disk = open_manager(&dir);

        let page = vec![0u8; PAGE_SIZE];
        let err = disk.write_page(PageId::INVALID, &page).unwrap_err();
        assert!(matches!(err, IoError::InvalidPageId));
    }

    #[test]
    fn test_sync() {
        let dir = tempdir().unwrap();
        let disk = open_manager(&dir);
        disk.write_page(PageId::new(0), &vec![1u8; PAGE_SIZE]).unwrap();
        disk.sync().unwrap();
    }
}
