//! Extendible hash table.
//!
//! Keys route through the directory page: the low `global_depth` bits of
//! the key's hash pick a directory entry, which names the bucket page.
//! When an insert finds its bucket full the table splits the bucket,
//! doubling the directory if the bucket already uses every directory bit.
//! When a removal empties a bucket the table merges it back into its
//! split image and halves the directory while no entry needs the full
//! depth.
//!
//! Latching follows the coarse-to-fine hierarchy: the table latch is held
//! in read mode for lookups and non-splitting writes, and in write mode
//! for anything that reshapes the directory. Escalation releases the read
//! latch, takes the write latch, and re-reads the directory - so a resize
//! that slipped in between is always observed.
//!
//! Every operation re-pins the directory page through the buffer pool and
//! unpins it when done; the directory is cached like any other page.

use std::marker::PhantomData;
use std::sync::Arc;

use keel_common::constants::MAX_GLOBAL_DEPTH;
use keel_common::types::{FixedSlot, PageId};
use keel_storage::buffer::{BufferPool, PageReadGuard};
use keel_storage::page::{BucketInsert, BucketPage, BucketPageRef, DirectoryPage, DirectoryPageRef};
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::{IndexError, IndexResult};
use crate::hash::{HashFn, SipHashFn};

/// A disk-backed extendible hash table.
///
/// Generic over the key and value types stored in bucket slots and the
/// injected hash function. Multiple values per key are allowed; identical
/// `(key, value)` pairs are not.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use keel_index::ExtendibleHashTable;
/// use keel_storage::buffer::{BufferPool, BufferPoolConfig, BufferPoolInstance};
/// use keel_storage::disk::FileDiskManager;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let disk = Arc::new(FileDiskManager::open("data.db", 4096)?);
/// let pool: Arc<dyn BufferPool> =
///     Arc::new(BufferPoolInstance::new(BufferPoolConfig::new(64), disk, None)?);
///
/// let table: ExtendibleHashTable<u32, u64> = ExtendibleHashTable::new(pool)?;
/// table.insert(&1, &100)?;
/// assert_eq!(table.get_value(&1)?, vec![100]);
/// # Ok(())
/// # }
/// ```
pub struct ExtendibleHashTable<K, V, H = SipHashFn> {
    bpm: Arc<dyn BufferPool>,
    directory_page_id: PageId,
    hasher: H,
    /// Table latch: readers for lookup and in-place writes, writer for
    /// split and merge.
    latch: RwLock<()>,
    _marker: PhantomData<(K, V)>,
}

impl<K, V, H> ExtendibleHashTable<K, V, H>
where
    K: FixedSlot + Eq,
    V: FixedSlot + Eq,
    H: HashFn<K>,
{
    /// Creates a table with the default hash function.
    pub fn new(bpm: Arc<dyn BufferPool>) -> IndexResult<Self>
    where
        H: Default,
    {
        Self::with_hasher(bpm, H::default())
    }

    /// Creates a table routed by `hasher`.
    ///
    /// Allocates the directory page and one initial bucket at global
    /// depth 0, and unpins both dirty.
    pub fn with_hasher(bpm: Arc<dyn BufferPool>, hasher: H) -> IndexResult<Self> {
        let (directory_page_id, dir_frame) = bpm.new_page()?;
        let (bucket_page_id, bucket_frame) = match bpm.new_page() {
            Ok(page) => page,
            Err(e) => {
                let _ = bpm.unpin_page(directory_page_id, false);
                return Err(e.into());
            }
        };

        {
            let mut data = dir_frame.write_data();
            let mut dir = DirectoryPage::new(&mut data);
            dir.init(directory_page_id);
            dir.set_bucket_page_id(0, bucket_page_id);
        }
        {
            let mut data = bucket_frame.write_data();
            let mut bucket = BucketPage::<K, V>::new(&mut data);
            bucket.init(bucket_page_id);
        }

        bpm.unpin_page(bucket_page_id, true)?;
        bpm.unpin_page(directory_page_id, true)?;

        Ok(Self {
            bpm,
            directory_page_id,
            hasher,
            latch: RwLock::new(()),
            _marker: PhantomData,
        })
    }

    /// Returns the id of the directory page.
    pub fn directory_page_id(&self) -> PageId {
        self.directory_page_id
    }

    #[inline]
    fn hash_of(&self, key: &K) -> u32 {
        self.hasher.hash(key)
    }

    /// Reads the directory entry a key routes to. Pins and unpins the
    /// directory; the caller must hold the table latch.
    fn route(&self, key: &K) -> IndexResult<(PageId, u32)> {
        let dir_frame = self.bpm.fetch_page(self.directory_page_id)?;
        let routed = {
            let data = dir_frame.read_data();
            let dir = DirectoryPageRef::new(&data);
            let index = (self.hash_of(key) & dir.global_depth_mask()) as usize;
            (dir.bucket_page_id(index), dir.local_depth(index))
        };
        self.bpm.unpin_page(self.directory_page_id, false)?;
        Ok(routed)
    }

    /// Collects every value stored under `key`.
    pub fn get_value(&self, key: &K) -> IndexResult<Vec<V>> {
        let _guard = self.latch.read();

        let (bucket_page_id, _) = self.route(key)?;
        let bucket_frame = self.bpm.fetch_page(bucket_page_id)?;
        let guard = PageReadGuard::new(&*self.bpm, bucket_page_id, bucket_frame);

        let mut values = Vec::new();
        let data = guard.data();
        BucketPageRef::<K, V>::new(&data).get_value(key, &mut values);

        Ok(values)
    }

    /// Inserts a `(key, value)` pair.
    ///
    /// Fails with [`IndexError::DuplicateEntry`] if the identical pair is
    /// already present, and with [`IndexError::DirectoryFull`] if storing
    /// it would require growing the directory past its cap.
    pub fn insert(&self, key: &K, value: &V) -> IndexResult<()> {
        {
            let _guard = self.latch.read();

            let (bucket_page_id, _) = self.route(key)?;
            let bucket_frame = self.bpm.fetch_page(bucket_page_id)?;

            let outcome = {
                let mut data = bucket_frame.write_data();
                let mut bucket = BucketPage::<K, V>::new(&mut data);
                bucket.insert(key, value)
            };
            match outcome {
                BucketInsert::Inserted => {
                    self.bpm.unpin_page(bucket_page_id, true)?;
                    return Ok(());
                }
                BucketInsert::Duplicate => {
                    self.bpm.unpin_page(bucket_page_id, false)?;
                    return Err(IndexError::DuplicateEntry);
                }
                BucketInsert::Full => {
                    self.bpm.unpin_page(bucket_page_id, false)?;
                }
            }
        }

        // The bucket is full: escalate to the write latch and split. The
        // directory is re-read under the new latch, so a concurrent
        // resize is picked up before any reshaping.
        let _guard = self.latch.write();
        self.split_insert(key, value)
    }

    /// Splits the key's bucket until the pair fits, doubling the
    /// directory as needed. Caller holds the table write latch.
    fn split_insert(&self, key: &K, value: &V) -> IndexResult<()> {
        loop {
            let dir_frame = self.bpm.fetch_page(self.directory_page_id)?;
            let mut dir_data = dir_frame.write_data();
            let mut dir = DirectoryPage::new(&mut dir_data);

            let hash = self.hash_of(key);
            let index = (hash & dir.global_depth_mask()) as usize;
            let bucket_page_id = dir.bucket_page_id(index);

            let bucket_frame = match self.bpm.fetch_page(bucket_page_id) {
                Ok(frame) => frame,
                Err(e) => {
                    drop(dir);
                    drop(dir_data);
                    self.bpm.unpin_page(self.directory_page_id, false)?;
                    return Err(e.into());
                }
            };

            // Another thread may have split or merged between our latch
            // acquisitions; retry the plain insert first.
            let outcome = {
                let mut data = bucket_frame.write_data();
                let mut bucket = BucketPage::<K, V>::new(&mut data);
                bucket.insert(key, value)
            };
            match outcome {
                BucketInsert::Inserted => {
                    self.bpm.unpin_page(bucket_page_id, true)?;
                    drop(dir);
                    drop(dir_data);
                    self.bpm.unpin_page(self.directory_page_id, false)?;
                    return Ok(());
                }
                BucketInsert::Duplicate => {
                    self.bpm.unpin_page(bucket_page_id, false)?;
                    drop(dir);
                    drop(dir_data);
                    self.bpm.unpin_page(self.directory_page_id, false)?;
                    return Err(IndexError::DuplicateEntry);
                }
                BucketInsert::Full => {}
            }

            let local_depth = dir.local_depth(index);
            if local_depth == dir.global_depth() {
                if dir.global_depth() == MAX_GLOBAL_DEPTH {
                    self.bpm.unpin_page(bucket_page_id, false)?;
                    drop(dir);
                    drop(dir_data);
                    self.bpm.unpin_page(self.directory_page_id, false)?;
                    return Err(IndexError::directory_full());
                }
                dir.incr_global_depth();
            }

            let (sibling_page_id, sibling_frame) = match self.bpm.new_page() {
                Ok(page) => page,
                Err(e) => {
                    self.bpm.unpin_page(bucket_page_id, false)?;
                    drop(dir);
                    drop(dir_data);
                    // The doubling above stays: it is harmless on its own.
                    self.bpm.unpin_page(self.directory_page_id, true)?;
                    return Err(e.into());
                }
            };

            // The sibling takes over every directory entry that routes to
            // the old bucket with the new depth bit set.
            let split_bit = 1u32 << local_depth;
            for entry in 0..dir.size() {
                if dir.bucket_page_id(entry) == bucket_page_id {
                    dir.set_local_depth(entry, local_depth + 1);
                    if entry as u32 & split_bit != 0 {
                        dir.set_bucket_page_id(entry, sibling_page_id);
                    }
                }
            }

            debug!(
                bucket = bucket_page_id.as_u32(),
                sibling = sibling_page_id.as_u32(),
                depth = local_depth + 1,
                "bucket split"
            );

            // Redistribute the live pairs by the newly covered hash bit.
            {
                let mut old_data = bucket_frame.write_data();
                let mut old_bucket = BucketPage::<K, V>::new(&mut old_data);
                let mut new_data = sibling_frame.write_data();
                let mut new_bucket = BucketPage::<K, V>::new(&mut new_data);
                new_bucket.init(sibling_page_id);

                let entries = old_bucket.entries();
                old_bucket.reset();
                for (k, v) in entries {
                    let target = if self.hash_of(&k) & split_bit != 0 {
                        &mut new_bucket
                    } else {
                        &mut old_bucket
                    };
                    let outcome = target.insert(&k, &v);
                    debug_assert_eq!(outcome, BucketInsert::Inserted);
                }
            }

            self.bpm.unpin_page(bucket_page_id, true)?;
            self.bpm.unpin_page(sibling_page_id, true)?;
            drop(dir);
            drop(dir_data);
            self.bpm.unpin_page(self.directory_page_id, true)?;

            // Retry against the reshaped directory. If every pair landed
            // on one side the destination can still be full; the next
            // iteration splits again, bounded by the depth cap.
        }
    }

    /// Removes a `(key, value)` pair, returning whether it was present.
    ///
    /// If the removal empties the bucket, the table attempts to merge it
    /// with its split image. The merge is advisory: failing to merge is
    /// harmless.
    pub fn remove(&self, key: &K, value: &V) -> IndexResult<bool> {
        let (removed, needs_merge) = {
            let _guard = self.latch.read();

            let (bucket_page_id, local_depth) = self.route(key)?;
            let bucket_frame = self.bpm.fetch_page(bucket_page_id)?;

            let (removed, empty) = {
                let mut data = bucket_frame.write_data();
                let mut bucket = BucketPage::<K, V>::new(&mut data);
                let removed = bucket.remove(key, value);
                (removed, bucket.is_empty())
            };
            self.bpm.unpin_page(bucket_page_id, removed)?;

            (removed, removed && empty && local_depth > 0)
        };

        if needs_merge {
            let _guard = self.latch.write();
            self.merge(key)?;
        }

        Ok(removed)
    }

    /// Merges the key's (empty) bucket into its split image and shrinks
    /// the directory while possible. Caller holds the table write latch.
    ///
    /// Preconditions are re-checked from scratch: between the removal and
    /// the escalation the bucket may have been refilled or reshaped, in
    /// which case this does nothing.
    fn merge(&self, key: &K) -> IndexResult<()> {
        // Re-read the routing under the write latch and check the merge
        // preconditions: the bucket must sit at depth > 0, and its split
        // image must be a distinct bucket at the same depth.
        let dir_frame = self.bpm.fetch_page(self.directory_page_id)?;
        let plan = {
            let mut data = dir_frame.write_data();
            let dir = DirectoryPage::new(&mut data);

            let index = (self.hash_of(key) & dir.global_depth_mask()) as usize;
            let local_depth = dir.local_depth(index);
            let target_id = dir.bucket_page_id(index);

            if local_depth == 0 {
                None
            } else {
                let image_index = dir.split_image_index(index);
                let image_id = dir.bucket_page_id(image_index);
                if image_id == target_id || dir.local_depth(image_index) != local_depth {
                    None
                } else {
                    Some((target_id, image_id, local_depth))
                }
            }
        };
        self.bpm.unpin_page(self.directory_page_id, false)?;

        let Some((target_id, image_id, local_depth)) = plan else {
            return Ok(());
        };

        // Re-check emptiness: an insert may have slipped in before the
        // write latch was taken. The write latch keeps the check stable
        // until the directory is rewritten below.
        let target_frame = self.bpm.fetch_page(target_id)?;
        let empty = {
            let data = target_frame.read_data();
            BucketPageRef::<K, V>::new(&data).is_empty()
        };
        self.bpm.unpin_page(target_id, false)?;
        if !empty {
            return Ok(());
        }

        // Point the target's entries at the image, drop both sides to the
        // shared depth, and halve the directory while no entry needs the
        // full depth.
        let dir_frame = self.bpm.fetch_page(self.directory_page_id)?;
        {
            let mut data = dir_frame.write_data();
            let mut dir = DirectoryPage::new(&mut data);

            for entry in 0..dir.size() {
                if dir.bucket_page_id(entry) == target_id {
                    dir.set_bucket_page_id(entry, image_id);
                }
                if dir.bucket_page_id(entry) == image_id {
                    dir.set_local_depth(entry, local_depth - 1);
                }
            }

            while dir.can_shrink() {
                dir.decr_global_depth();
            }
        }
        self.bpm.unpin_page(self.directory_page_id, true)?;

        debug!(
            bucket = target_id.as_u32(),
            image = image_id.as_u32(),
            depth = local_depth - 1,
            "buckets merged"
        );

        // Freeing the empty bucket is best-effort.
        if let Err(e) = self.bpm.delete_page(target_id) {
            warn!(page_id = target_id.as_u32(), error = %e, "could not free merged bucket");
        }

        Ok(())
    }

    /// Returns the directory's global depth.
    pub fn global_depth(&self) -> IndexResult<u32> {
        let _guard = self.latch.read();

        let dir_frame = self.bpm.fetch_page(self.directory_page_id)?;
        let pin = PageReadGuard::new(&*self.bpm, self.directory_page_id, dir_frame);
        let data = pin.data();
        Ok(DirectoryPageRef::new(&data).global_depth())
    }

    /// Checks the directory invariants, panicking on violation.
    pub fn verify_integrity(&self) -> IndexResult<()> {
        let _guard = self.latch.read();

        let dir_frame = self.bpm.fetch_page(self.directory_page_id)?;
        let pin = PageReadGuard::new(&*self.bpm, self.directory_page_id, dir_frame);
        let data = pin.data();
        DirectoryPageRef::new(&data).verify_integrity();
        Ok(())
    }
}

impl<K, V, H> std::fmt::Debug for ExtendibleHashTable<K, V, H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtendibleHashTable")
            .field("directory_page_id", &self.directory_page_id)
            .finish()
    }
}
