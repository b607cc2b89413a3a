//! Single buffer pool instance.
//!
//! One instance owns a fixed array of frames, the page table mapping
//! resident page ids to frames, the free list, and the LRU replacer. Every
//! public operation is atomic with respect to the others: the instance
//! latch is held across the whole call, including disk I/O - a deliberate
//! simplification that keeps the fetch/evict/write-back interleavings easy
//! to reason about.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use keel_common::types::PageId;
use parking_lot::Mutex;
use tracing::debug;

use super::config::BufferPoolConfig;
use super::error::{BufferError, BufferResult};
use super::frame::{BufferFrame, FrameId};
use super::replacer::LruReplacer;
use super::{BufferPool, BufferPoolStats};
use crate::disk::{DiskManager, LogManager};

/// State guarded by the instance latch.
struct PoolState {
    /// Maps resident page ids to the frames caching them.
    page_table: HashMap<PageId, FrameId>,
    /// Frames holding no page at all.
    free_list: VecDeque<FrameId>,
    /// Next page id to hand out; strides by `num_instances`.
    next_page_id: u32,
}

/// A single shard of the buffer pool.
///
/// Victim policy: the free list is always consulted before the replacer.
/// When both are empty the operation fails with
/// [`BufferError::PoolExhausted`]; callers unpin something and retry.
pub struct BufferPoolInstance {
    pool_size: usize,
    page_size: usize,
    num_instances: u32,
    instance_index: u32,
    frames: Vec<Arc<BufferFrame>>,
    state: Mutex<PoolState>,
    replacer: LruReplacer,
    disk: Arc<dyn DiskManager>,
    /// Forwarded on construction for layers that order WAL writes against
    /// eviction; never invoked by the cache itself.
    #[allow(dead_code)]
    log: Option<Arc<LogManager>>,
    fetch_count: AtomicU64,
    hit_count: AtomicU64,
    miss_count: AtomicU64,
    eviction_count: AtomicU64,
    flush_count: AtomicU64,
}

impl BufferPoolInstance {
    /// Creates a standalone instance (not part of a parallel pool).
    pub fn new(
        config: BufferPoolConfig,
        disk: Arc<dyn DiskManager>,
        log: Option<Arc<LogManager>>,
    ) -> BufferResult<Self> {
        Self::with_instance(config, 1, 0, disk, log)
    }

    /// Creates one shard of a parallel pool.
    ///
    /// The shard allocates only page ids congruent to `instance_index`
    /// modulo `num_instances`.
    pub fn with_instance(
        config: BufferPoolConfig,
        num_instances: u32,
        instance_index: u32,
        disk: Arc<dyn DiskManager>,
        log: Option<Arc<LogManager>>,
    ) -> BufferResult<Self> {
        config
            .validate()
            .map_err(|e| BufferError::config(e.to_string()))?;
        if num_instances == 0 {
            return Err(BufferError::config("num_instances must be > 0"));
        }
        if instance_index >= num_instances {
            return Err(BufferError::config(
                "instance_index must be < num_instances",
            ));
        }

        let pool_size = config.pool_size;
        let page_size = config.page_size;

        let frames: Vec<Arc<BufferFrame>> = (0..pool_size)
            .map(|i| Arc::new(BufferFrame::new(FrameId::new(i), page_size)))
            .collect();

        // Initially every frame is free.
        let free_list: VecDeque<FrameId> = (0..pool_size).map(FrameId::new).collect();

        Ok(Self {
            pool_size,
            page_size,
            num_instances,
            instance_index,
            frames,
            state: Mutex::new(PoolState {
                page_table: HashMap::with_capacity(pool_size),
                free_list,
                next_page_id: instance_index,
            }),
            replacer: LruReplacer::new(pool_size),
            disk,
            log,
            fetch_count: AtomicU64::new(0),
            hit_count: AtomicU64::new(0),
            miss_count: AtomicU64::new(0),
            eviction_count: AtomicU64::new(0),
            flush_count: AtomicU64::new(0),
        })
    }

    /// Returns this shard's index within its parallel pool.
    pub fn instance_index(&self) -> u32 {
        self.instance_index
    }

    /// Returns the page size in bytes.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Returns true if the page is resident.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.state.lock().page_table.contains_key(&page_id)
    }

    /// Samples the instance's counters.
    pub fn stats(&self) -> BufferPoolStats {
        let mut pinned = 0;
        let mut dirty = 0;
        for frame in &self.frames {
            if frame.is_pinned() {
                pinned += 1;
            }
            if frame.is_dirty() {
                dirty += 1;
            }
        }

        BufferPoolStats {
            fetches: self.fetch_count.load(Ordering::Relaxed),
            hits: self.hit_count.load(Ordering::Relaxed),
            misses: self.miss_count.load(Ordering::Relaxed),
            evictions: self.eviction_count.load(Ordering::Relaxed),
            flushes: self.flush_count.load(Ordering::Relaxed),
            pinned_frames: pinned,
            dirty_frames: dirty,
        }
    }

    // -------------------------------------------------------------------------
    // Private helpers
    // -------------------------------------------------------------------------

    /// Hands out the next page id owned by this shard.
    fn allocate_page(&self, state: &mut PoolState) -> PageId {
        let id = state.next_page_id;
        state.next_page_id += self.num_instances;
        debug_assert_eq!(
            id % self.num_instances,
            self.instance_index,
            "allocated page id must map back to this instance"
        );
        PageId::new(id)
    }

    /// Records a freed page id with the disk manager. Reuse is the disk
    /// manager's policy; the pool only notifies.
    fn deallocate_page(&self, page_id: PageId) {
        debug!(page_id = page_id.as_u32(), "page deallocated");
        self.disk.deallocate_page(page_id);
    }

    /// Takes a reusable frame: free list first, then the replacer.
    ///
    /// A replacer victim is written back if dirty and removed from the
    /// page table before being handed out.
    fn acquire_frame(&self, state: &mut PoolState) -> BufferResult<FrameId> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Ok(frame_id);
        }

        let frame_id = self
            .replacer
            .victim()
            .ok_or(BufferError::PoolExhausted {
                pool_size: self.pool_size,
            })?;
        let frame = &self.frames[frame_id.index()];

        if frame.is_dirty() {
            let data = frame.read_data();
            self.disk.write_page(frame.page_id(), &data)?;
            drop(data);
            frame.set_dirty(false);
            self.flush_count.fetch_add(1, Ordering::Relaxed);
        }

        debug!(
            page_id = frame.page_id().as_u32(),
            frame_id = frame_id.index(),
            "page evicted"
        );
        state.page_table.remove(&frame.page_id());
        self.eviction_count.fetch_add(1, Ordering::Relaxed);
        Ok(frame_id)
    }

    /// Writes a resident page back and clears its dirty flag. Caller holds
    /// the instance latch.
    fn flush_frame(&self, frame: &BufferFrame) -> BufferResult<()> {
        let data = frame.read_data();
        self.disk.write_page(frame.page_id(), &data)?;
        drop(data);
        frame.set_dirty(false);
        self.flush_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl BufferPool for BufferPoolInstance {
    fn new_page(&self) -> BufferResult<(PageId, Arc<BufferFrame>)> {
        let mut state = self.state.lock();

        let frame_id = self.acquire_frame(&mut state)?;
        let frame = &self.frames[frame_id.index()];

        let page_id = self.allocate_page(&mut state);
        frame.reset_memory();
        frame.set_page_id(page_id);
        frame.set_dirty(false);
        frame.set_pin_count(1);

        state.page_table.insert(page_id, frame_id);
        self.replacer.pin(frame_id);

        Ok((page_id, Arc::clone(frame)))
    }

    fn fetch_page(&self, page_id: PageId) -> BufferResult<Arc<BufferFrame>> {
        let mut state = self.state.lock();
        self.fetch_count.fetch_add(1, Ordering::Relaxed);

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            let frame = &self.frames[frame_id.index()];
            frame.pin();
            self.replacer.pin(frame_id);
            self.hit_count.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(frame));
        }

        self.miss_count.fetch_add(1, Ordering::Relaxed);
        let frame_id = self.acquire_frame(&mut state)?;
        let frame = &self.frames[frame_id.index()];

        {
            let mut data = frame.write_data();
            self.disk.read_page(page_id, &mut data)?;
        }
        frame.set_page_id(page_id);
        frame.set_dirty(false);
        frame.set_pin_count(1);

        state.page_table.insert(page_id, frame_id);
        self.replacer.pin(frame_id);

        Ok(Arc::clone(frame))
    }

    fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> BufferResult<()> {
        let state = self.state.lock();

        let &frame_id = state
            .page_table
            .get(&page_id)
            .ok_or(BufferError::NotResident { page_id })?;
        let frame = &self.frames[frame_id.index()];

        if frame.pin_count() == 0 {
            return Err(BufferError::DoubleUnpin { page_id });
        }

        if frame.unpin() == 0 {
            self.replacer.unpin(frame_id);
        }
        frame.or_dirty(is_dirty);

        Ok(())
    }

    fn flush_page(&self, page_id: PageId) -> BufferResult<()> {
        let state = self.state.lock();

        let &frame_id = state
            .page_table
            .get(&page_id)
            .ok_or(BufferError::NotResident { page_id })?;
        self.flush_frame(&self.frames[frame_id.index()])
    }

    fn flush_all_pages(&self) -> BufferResult<()> {
        let state = self.state.lock();

        for &frame_id in state.page_table.values() {
            self.flush_frame(&self.frames[frame_id.index()])?;
        }
        Ok(())
    }

    fn delete_page(&self, page_id: PageId) -> BufferResult<()> {
        let mut state = self.state.lock();

        let &frame_id = match state.page_table.get(&page_id) {
            Some(frame_id) => frame_id,
            // Not resident: vacuously deleted.
            None => return Ok(()),
        };
        let frame = &self.frames[frame_id.index()];

        let pin_count = frame.pin_count();
        if pin_count > 0 {
            return Err(BufferError::StillPinned { page_id, pin_count });
        }

        state.page_table.remove(&page_id);
        self.deallocate_page(page_id);
        frame.reset();
        frame.reset_memory();
        state.free_list.push_back(frame_id);
        self.replacer.pin(frame_id);

        Ok(())
    }

    fn pool_size(&self) -> usize {
        self.pool_size
    }
}

impl std::fmt::Debug for BufferPoolInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPoolInstance")
            .field("pool_size", &self.pool_size)
            .field("page_size", &self.page_size)
            .field("instance_index", &self.instance_index)
            .field("pages_cached", &self.state.lock().page_table.len())
            .finish()
    }
}
