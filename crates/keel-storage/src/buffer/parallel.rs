//! Parallel (sharded) buffer pool.
//!
//! `N` independent pool instances, addressed by `page_id mod N`. Each
//! shard allocates only ids congruent to its own index, so routing is a
//! pure function of the page id and shards never coordinate except for
//! the round-robin allocation cursor.

use std::sync::Arc;

use keel_common::types::PageId;
use parking_lot::Mutex;

use super::config::BufferPoolConfig;
use super::error::{BufferError, BufferResult};
use super::frame::BufferFrame;
use super::pool::BufferPoolInstance;
use super::{BufferPool, BufferPoolStats};
use crate::disk::{DiskManager, LogManager};

/// Buffer pool composed of multiple instances to spread latch contention.
///
/// Id-addressed operations forward straight to the owning shard and hold
/// no outer lock; only `new_page` touches shared state, briefly, to bump
/// the allocation cursor.
pub struct ParallelBufferPool {
    instances: Vec<Arc<BufferPoolInstance>>,
    /// Shard to try first on the next `new_page`.
    next_instance: Mutex<usize>,
    num_instances: usize,
    pool_size_each: usize,
}

impl ParallelBufferPool {
    /// Creates `config.num_instances` shards of `config.pool_size` frames
    /// each, all backed by the same disk manager.
    pub fn new(
        config: BufferPoolConfig,
        disk: Arc<dyn DiskManager>,
        log: Option<Arc<LogManager>>,
    ) -> BufferResult<Self> {
        config
            .validate()
            .map_err(|e| BufferError::config(e.to_string()))?;

        let num_instances = config.num_instances;
        let instances = (0..num_instances)
            .map(|i| {
                BufferPoolInstance::with_instance(
                    config.clone(),
                    num_instances as u32,
                    i as u32,
                    Arc::clone(&disk),
                    log.clone(),
                )
                .map(Arc::new)
            })
            .collect::<BufferResult<Vec<_>>>()?;

        Ok(Self {
            instances,
            next_instance: Mutex::new(0),
            num_instances,
            pool_size_each: config.pool_size,
        })
    }

    /// Returns the number of shards.
    pub fn num_instances(&self) -> usize {
        self.num_instances
    }

    /// Returns the shard responsible for `page_id`.
    fn instance_for(&self, page_id: PageId) -> &BufferPoolInstance {
        let index = page_id.as_u32() as usize % self.num_instances;
        &self.instances[index]
    }

    /// Rolls every shard's counters into one sample.
    pub fn stats(&self) -> BufferPoolStats {
        let mut total = BufferPoolStats::default();
        for instance in &self.instances {
            total.merge(&instance.stats());
        }
        total
    }
}

impl BufferPool for ParallelBufferPool {
    /// Tries shards round-robin starting at the cursor, returning the
    /// first successful allocation. The cursor advances by one per call
    /// regardless of outcome, so a full shard cannot starve allocation
    /// while another has room.
    fn new_page(&self) -> BufferResult<(PageId, Arc<BufferFrame>)> {
        let start = {
            let mut cursor = self.next_instance.lock();
            let start = *cursor;
            *cursor = (start + 1) % self.num_instances;
            start
        };

        for i in 0..self.num_instances {
            let instance = &self.instances[(start + i) % self.num_instances];
            match instance.new_page() {
                Ok(result) => return Ok(result),
                Err(BufferError::PoolExhausted { .. }) => continue,
                Err(e) => return Err(e),
            }
        }

        Err(BufferError::PoolExhausted {
            pool_size: self.pool_size(),
        })
    }

    fn fetch_page(&self, page_id: PageId) -> BufferResult<Arc<BufferFrame>> {
        self.instance_for(page_id).fetch_page(page_id)
    }

    fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> BufferResult<()> {
        self.instance_for(page_id).unpin_page(page_id, is_dirty)
    }

    fn flush_page(&self, page_id: PageId) -> BufferResult<()> {
        self.instance_for(page_id).flush_page(page_id)
    }

    fn flush_all_pages(&self) -> BufferResult<()> {
        for instance in &self.instances {
            instance.flush_all_pages()?;
        }
        Ok(())
    }

    fn delete_page(&self, page_id: PageId) -> BufferResult<()> {
        self.instance_for(page_id).delete_page(page_id)
    }

    fn pool_size(&self) -> usize {
        self.pool_size_each * self.num_instances
    }
}

impl std::fmt::Debug for ParallelBufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelBufferPool")
            .field("num_instances", &self.num_instances)
            .field("pool_size_each", &self.pool_size_each)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::FileDiskManager;
    use tempfile::tempdir;

    const PAGE_SIZE: usize = 4096;

    fn create_pool(
        dir: &tempfile::TempDir,
        num_instances: usize,
        pool_size: usize,
    ) -> ParallelBufferPool {
        let disk = Arc::new(
            FileDiskManager::open(dir.path().join("test.db"), PAGE_SIZE).unwrap(),
        );
        let config = BufferPoolConfig::new(pool_size)
            .with_page_size(PAGE_SIZE)
            .with_num_instances(num_instances);
        ParallelBufferPool::new(config, disk, None).unwrap()
    }

    #[test]
    fn test_pool_size_is_sum_of_shards() {
        let dir = tempdir().unwrap();
        let pool = create_pool(&dir, 3, 5);
        assert_eq!(pool.pool_size(), 15);
        assert_eq!(pool.num_instances(), 3);
    }

    #[test]
    fn test_round_robin_allocation() {
        let dir = tempdir().unwrap();
        let pool = create_pool(&dir, 3, 1);

        // Seven allocations walk the shards in order even though each
        // shard only has one frame: unpinning lets the shard reuse it.
        let mut residues = Vec::new();
        for _ in 0..7 {
            let (page_id, _) = pool.new_page().unwrap();
            pool.unpin_page(page_id, false).unwrap();
            residues.push(page_id.as_u32() % 3);
        }
        assert_eq!(residues, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn test_full_shard_does_not_starve_allocation() {
        let dir = tempdir().unwrap();
        let pool = create_pool(&dir, 2, 1);

        // Pin shard 0's only frame.
        let (page0, _) = pool.new_page().unwrap();
        assert_eq!(page0.as_u32() % 2, 0);

        // The cursor points at shard 1 now; both of the next allocations
        // must land on shard 1 (the only one with room).
        let (page1, _) = pool.new_page().unwrap();
        assert_eq!(page1.as_u32() % 2, 1);
        pool.unpin_page(page1, false).unwrap();

        // Cursor is back on shard 0, which is still pinned full; the
        // attempt falls through to shard 1.
        let (page2, _) = pool.new_page().unwrap();
        assert_eq!(page2.as_u32() % 2, 1);
    }

    #[test]
    fn test_exhaustion_when_all_shards_full() {
        let dir = tempdir().unwrap();
        let pool = create_pool(&dir, 2, 1);

        let _a = pool.new_page().unwrap();
        let _b = pool.new_page().unwrap();

        let err = pool.new_page().unwrap_err();
        assert!(matches!(err, BufferError::PoolExhausted { pool_size: 2 }));
    }

    #[test]
    fn test_operations_route_by_modulus() {
        let dir = tempdir().unwrap();
        let pool = create_pool(&dir, 3, 4);

        let mut ids = Vec::new();
        for _ in 0..6 {
            let (page_id, frame) = pool.new_page().unwrap();
            frame.write_data()[0..4].copy_from_slice(&page_id.as_u32().to_le_bytes());
            pool.unpin_page(page_id, true).unwrap();
            ids.push(page_id);
        }

        pool.flush_all_pages().unwrap();

        for &page_id in &ids {
            let frame = pool.fetch_page(page_id).unwrap();
            assert_eq!(&frame.read_data()[0..4], &page_id.as_u32().to_le_bytes());
            pool.unpin_page(page_id, false).unwrap();
        }

        for &page_id in &ids {
            pool.delete_page(page_id).unwrap();
        }
        assert_eq!(pool.stats().dirty_frames, 0);
    }

    #[test]
    fn test_concurrent_allocation_spreads_shards() {
        use std::thread;

        let dir = tempdir().unwrap();
        let pool = Arc::new(create_pool(&dir, 4, 8));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let pool = Arc::clone(&pool);
            handles.push(thread::spawn(move || {
                let mut ids = Vec::new();
                for _ in 0..6 {
                    let (page_id, _) = pool.new_page().unwrap();
                    pool.unpin_page(page_id, false).unwrap();
                    ids.push(page_id);
                }
                ids
            }));
        }

        let mut all_ids = Vec::new();
        for handle in handles {
            all_ids.extend(handle.join().unwrap());
        }

        // Ids are unique and every shard served some allocations.
        let unique: std::collections::HashSet<_> = all_ids.iter().collect();
        assert_eq!(unique.len(), all_ids.len());
        for shard in 0..4u32 {
            assert!(all_ids.iter().any(|id| id.as_u32() % 4 == shard));
        }
    }
}
