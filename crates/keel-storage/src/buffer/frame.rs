//! Buffer frame - a slot in the buffer pool that holds one page.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use keel_common::types::{Lsn, PageId};
use parking_lot::RwLock;

/// Frame identifier - index into the buffer pool's frame array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(pub usize);

impl FrameId {
    /// Creates a new frame ID.
    #[inline]
    pub const fn new(id: usize) -> Self {
        Self(id)
    }

    /// Returns the raw index.
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl From<usize> for FrameId {
    fn from(id: usize) -> Self {
        Self::new(id)
    }
}

impl From<FrameId> for usize {
    fn from(id: FrameId) -> Self {
        id.0
    }
}

/// A buffer frame holds a single page in memory.
///
/// Each frame carries the cached page's identity, a pin count (number of
/// outstanding holders), a sticky dirty flag, and the raw page bytes.
/// Metadata lives in atomics so holders can read it without taking the
/// data lock; the pool serializes all metadata *transitions* under its own
/// latch.
///
/// A frame is in exactly one of three states:
/// - free: `page_id` invalid, pin count zero, on the pool's free list
/// - pinned: valid `page_id`, pin count > 0
/// - cached-unpinned: valid `page_id`, pin count zero, tracked by the
///   replacer as an eviction candidate
pub struct BufferFrame {
    /// Frame ID (index in the frame array).
    frame_id: FrameId,
    /// Page data buffer.
    data: RwLock<Vec<u8>>,
    /// Page ID cached in this frame (`PageId::INVALID` if free).
    page_id: AtomicU32,
    /// Pin count (number of active holders).
    pin_count: AtomicU32,
    /// Whether the page was modified since it was last written back.
    dirty: AtomicBool,
    /// LSN of the last modification, maintained by callers.
    lsn: AtomicU64,
}

impl BufferFrame {
    /// Creates a new empty buffer frame with zeroed data.
    pub fn new(frame_id: FrameId, page_size: usize) -> Self {
        Self {
            frame_id,
            data: RwLock::new(vec![0u8; page_size]),
            page_id: AtomicU32::new(PageId::INVALID.as_u32()),
            pin_count: AtomicU32::new(0),
            dirty: AtomicBool::new(false),
            lsn: AtomicU64::new(Lsn::INVALID.as_u64()),
        }
    }

    /// Returns the frame ID.
    #[inline]
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// Returns the page ID cached in this frame.
    #[inline]
    pub fn page_id(&self) -> PageId {
        PageId::new(self.page_id.load(Ordering::Acquire))
    }

    /// Sets the page ID for this frame.
    #[inline]
    pub(crate) fn set_page_id(&self, page_id: PageId) {
        self.page_id.store(page_id.as_u32(), Ordering::Release);
    }

    /// Returns true if no page is cached here.
    #[inline]
    pub fn is_empty(&self) -> bool {
        !self.page_id().is_valid()
    }

    /// Returns the current pin count.
    #[inline]
    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    /// Increments the pin count and returns the new value.
    #[inline]
    pub(crate) fn pin(&self) -> u32 {
        self.pin_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrements the pin count and returns the new value.
    ///
    /// The pool checks positivity before calling; an underflow here is a
    /// bookkeeping bug.
    #[inline]
    pub(crate) fn unpin(&self) -> u32 {
        let old = self.pin_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(old > 0, "unpinned frame with pin_count = 0");
        old - 1
    }

    /// Sets the pin count outright (frame initialization).
    #[inline]
    pub(crate) fn set_pin_count(&self, count: u32) {
        self.pin_count.store(count, Ordering::Release);
    }

    /// Returns true if the frame is pinned.
    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.pin_count() > 0
    }

    /// Returns true if the frame is dirty.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Sets or clears the dirty flag outright.
    #[inline]
    pub(crate) fn set_dirty(&self, dirty: bool) {
        self.dirty.store(dirty, Ordering::Release);
    }

    /// ORs `dirty` into the dirty flag.
    ///
    /// The flag is sticky: once any holder unpins dirty, it stays set
    /// until the page is written back.
    #[inline]
    pub(crate) fn or_dirty(&self, dirty: bool) {
        if dirty {
            self.dirty.store(true, Ordering::Release);
        }
    }

    /// Returns the LSN of the last modification.
    #[inline]
    pub fn lsn(&self) -> Lsn {
        Lsn::new(self.lsn.load(Ordering::Acquire))
    }

    /// Sets the LSN.
    #[inline]
    pub fn set_lsn(&self, lsn: Lsn) {
        self.lsn.store(lsn.as_u64(), Ordering::Release);
    }

    /// Returns a read lock on the page data.
    #[inline]
    pub fn read_data(&self) -> parking_lot::RwLockReadGuard<'_, Vec<u8>> {
        self.data.read()
    }

    /// Returns a write lock on the page data.
    #[inline]
    pub fn write_data(&self) -> parking_lot::RwLockWriteGuard<'_, Vec<u8>> {
        self.data.write()
    }

    /// Zeroes the page bytes.
    pub(crate) fn reset_memory(&self) {
        self.data.write().fill(0);
    }

    /// Resets the metadata to the free state.
    pub(crate) fn reset(&self) {
        self.page_id
            .store(PageId::INVALID.as_u32(), Ordering::Release);
        self.pin_count.store(0, Ordering::Release);
        self.dirty.store(false, Ordering::Release);
        self.lsn.store(Lsn::INVALID.as_u64(), Ordering::Release);
    }
}

impl std::fmt::Debug for BufferFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferFrame")
            .field("frame_id", &self.frame_id)
            .field("page_id", &self.page_id())
            .field("pin_count", &self.pin_count())
            .field("dirty", &self.is_dirty())
            .finish()
    }
}
