//! RAII pin guards.
//!
//! Guards keep a fetched page pinned for their lifetime and route the
//! unpin back through the owning pool, so the final unpin admits the frame
//! to the replacer. The write guard remembers whether the page was touched
//! and unpins with that dirty intent.
//!
//! Typed page views borrow the frame bytes through a guard and must be
//! dropped before the guard itself goes away.

use std::sync::Arc;

use keel_common::types::PageId;
use tracing::warn;

use super::frame::BufferFrame;
use super::BufferPool;

/// Read guard for a pinned page.
///
/// Unpins clean when dropped.
pub struct PageReadGuard<'a> {
    pool: &'a dyn BufferPool,
    frame: Arc<BufferFrame>,
    page_id: PageId,
}

impl<'a> PageReadGuard<'a> {
    /// Wraps a frame returned by `fetch_page`; takes over its pin.
    pub fn new(pool: &'a dyn BufferPool, page_id: PageId, frame: Arc<BufferFrame>) -> Self {
        Self {
            pool,
            frame,
            page_id,
        }
    }

    /// Returns the page ID.
    #[inline]
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Returns a read lock on the page data.
    #[inline]
    pub fn data(&self) -> parking_lot::RwLockReadGuard<'_, Vec<u8>> {
        self.frame.read_data()
    }
}

impl Drop for PageReadGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.pool.unpin_page(self.page_id, false) {
            warn!(page_id = self.page_id.as_u32(), error = %e, "read guard unpin failed");
        }
    }
}

impl std::fmt::Debug for PageReadGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageReadGuard")
            .field("page_id", &self.page_id)
            .field("frame_id", &self.frame.frame_id())
            .finish()
    }
}

/// Write guard for a pinned page.
///
/// Unpins when dropped, dirty if the data was accessed mutably (or
/// [`mark_dirty`](Self::mark_dirty) was called).
pub struct PageWriteGuard<'a> {
    pool: &'a dyn BufferPool,
    frame: Arc<BufferFrame>,
    page_id: PageId,
    dirty: bool,
}

impl<'a> PageWriteGuard<'a> {
    /// Wraps a frame returned by `fetch_page` or `new_page`; takes over
    /// its pin.
    pub fn new(pool: &'a dyn BufferPool, page_id: PageId, frame: Arc<BufferFrame>) -> Self {
        Self {
            pool,
            frame,
            page_id,
            dirty: false,
        }
    }

    /// Returns the page ID.
    #[inline]
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Returns a read lock on the page data.
    #[inline]
    pub fn data(&self) -> parking_lot::RwLockReadGuard<'_, Vec<u8>> {
        self.frame.read_data()
    }

    /// Returns a write lock on the page data and records the dirty intent.
    #[inline]
    pub fn data_mut(&mut self) -> parking_lot::RwLockWriteGuard<'_, Vec<u8>> {
        self.dirty = true;
        self.frame.write_data()
    }

    /// Records the dirty intent without touching the data.
    #[inline]
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Returns true if this guard will unpin dirty.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

impl Drop for PageWriteGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.pool.unpin_page(self.page_id, self.dirty) {
            warn!(page_id = self.page_id.as_u32(), error = %e, "write guard unpin failed");
        }
    }
}

impl std::fmt::Debug for PageWriteGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageWriteGuard")
            .field("page_id", &self.page_id)
            .field("frame_id", &self.frame.frame_id())
            .field("dirty", &self.dirty)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BufferPoolConfig, BufferPoolInstance};
    use crate::disk::FileDiskManager;
    use tempfile::tempdir;

    fn create_pool(dir: &tempfile::TempDir) -> BufferPoolInstance {
        let disk = Arc::new(
            FileDiskManager::open(dir.path().join("test.db"), 4096).unwrap(),
        );
        BufferPoolInstance::new(BufferPoolConfig::new(10), disk, None).unwrap()
    }

    #[test]
    fn test_read_guard_unpins_on_drop() {
        let dir = tempdir().unwrap();
        let pool = create_pool(&dir);

        let (page_id, frame) = pool.new_page().unwrap();
        pool.unpin_page(page_id, false).unwrap();

        {
            let fetched = pool.fetch_page(page_id).unwrap();
            let _guard = PageReadGuard::new(&pool, page_id, fetched);
            assert_eq!(frame.pin_count(), 1);
        }
        assert_eq!(frame.pin_count(), 0);
        assert!(!frame.is_dirty());
    }

    #[test]
    fn test_write_guard_unpins_dirty_after_mutation() {
        let dir = tempdir().unwrap();
        let pool = create_pool(&dir);

        let (page_id, frame) = pool.new_page().unwrap();
        {
            let mut guard = PageWriteGuard::new(&pool, page_id, Arc::clone(&frame));
            guard.data_mut()[0] = 0x42;
            assert!(guard.is_dirty());
        }
        assert_eq!(frame.pin_count(), 0);
        assert!(frame.is_dirty());
    }

    #[test]
    fn test_write_guard_unpins_clean_without_mutation() {
        let dir = tempdir().unwrap();
        let pool = create_pool(&dir);

        let (page_id, frame) = pool.new_page().unwrap();
        {
            let guard = PageWriteGuard::new(&pool, page_id, Arc::clone(&frame));
            assert_eq!(guard.data()[0], 0);
        }
        assert_eq!(frame.pin_count(), 0);
        assert!(!frame.is_dirty());
    }

    #[test]
    fn test_mark_dirty_without_data_access() {
        let dir = tempdir().unwrap();
        let pool = create_pool(&dir);

        let (page_id, frame) = pool.new_page().unwrap();
        {
            let mut guard = PageWriteGuard::new(&pool, page_id, Arc::clone(&frame));
            guard.mark_dirty();
        }
        assert!(frame.is_dirty());
    }
}
