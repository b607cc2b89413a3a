//! Extendible hash bucket page.
//!
//! A bucket is a slotted array of fixed-width `(key, value)` pairs with
//! two bitmaps:
//!
//! - **occupied**: the slot has held a pair at some point in its history.
//!   Sticky - removal leaves it set - so the first never-occupied slot
//!   marks the end of history and scans may stop there.
//! - **readable**: the slot holds a live pair right now. A slot that is
//!   occupied but not readable is a tombstone.
//!
//! The bitmaps are only rebuilt when the bucket is redistributed during a
//! split.
//!
//! # Page Layout
//!
//! ```text
//! Offset        Size          Field
//! ------        ----          -----
//!   0             4           page_id
//!   4             8           lsn
//!  12             4           reserved
//!  16             ceil(N/8)   occupied bitmap
//!  16 + bm        ceil(N/8)   readable bitmap
//!  16 + 2*bm      N * pair    (key, value) slots
//! ```
//!
//! where `N` is the largest capacity that fits the page.

use std::marker::PhantomData;

use keel_common::types::{FixedSlot, Lsn, PageId};

const PAGE_ID_OFFSET: usize = 0;
const LSN_OFFSET: usize = 4;
const BUCKET_HEADER_SIZE: usize = 16;

/// Outcome of a bucket-level insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketInsert {
    /// The pair was stored.
    Inserted,
    /// The identical (key, value) pair is already present.
    Duplicate,
    /// Every slot holds a live pair.
    Full,
}

fn bitmap_bytes(capacity: usize) -> usize {
    capacity.div_ceil(8)
}

/// Largest number of slots that fits a page of `page_size` bytes for the
/// given pair width, with both bitmaps accounted for.
fn capacity_for(page_size: usize, pair_len: usize) -> usize {
    let avail = page_size - BUCKET_HEADER_SIZE;
    let mut capacity = (avail * 8) / (pair_len * 8 + 2);
    while 2 * bitmap_bytes(capacity) + capacity * pair_len > avail {
        capacity -= 1;
    }
    capacity
}

/// Mutable view of a bucket page.
pub struct BucketPage<'a, K, V> {
    data: &'a mut [u8],
    capacity: usize,
    _marker: PhantomData<(K, V)>,
}

impl<'a, K, V> BucketPage<'a, K, V>
where
    K: FixedSlot + Eq,
    V: FixedSlot + Eq,
{
    /// Creates a view into the given page buffer.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is too small to hold even one slot.
    pub fn new(data: &'a mut [u8]) -> Self {
        let capacity = Self::capacity(data.len());
        assert!(capacity > 0, "page too small for a single bucket slot");
        Self {
            data,
            capacity,
            _marker: PhantomData,
        }
    }

    /// Number of slots a bucket holds in a page of `page_size` bytes.
    pub fn capacity(page_size: usize) -> usize {
        capacity_for(page_size, K::ENCODED_LEN + V::ENCODED_LEN)
    }

    /// Initializes the header of a freshly zeroed page.
    pub fn init(&mut self, page_id: PageId) {
        self.set_page_id(page_id);
        self.set_lsn(Lsn::INVALID);
    }

    /// Returns the bucket page's own id.
    #[inline]
    pub fn page_id(&self) -> PageId {
        PageId::from_le_bytes(self.data[PAGE_ID_OFFSET..PAGE_ID_OFFSET + 4].try_into().unwrap())
    }

    /// Sets the bucket page's own id.
    #[inline]
    pub fn set_page_id(&mut self, page_id: PageId) {
        self.data[PAGE_ID_OFFSET..PAGE_ID_OFFSET + 4].copy_from_slice(&page_id.to_le_bytes());
    }

    /// Returns the LSN.
    #[inline]
    pub fn lsn(&self) -> Lsn {
        Lsn::from_le_bytes(self.data[LSN_OFFSET..LSN_OFFSET + 8].try_into().unwrap())
    }

    /// Sets the LSN.
    #[inline]
    pub fn set_lsn(&mut self, lsn: Lsn) {
        self.data[LSN_OFFSET..LSN_OFFSET + 8].copy_from_slice(&lsn.to_le_bytes());
    }

    /// Number of slots in this view's page.
    #[inline]
    pub fn slot_count(&self) -> usize {
        self.capacity
    }

    #[inline]
    fn occupied_offset(&self) -> usize {
        BUCKET_HEADER_SIZE
    }

    #[inline]
    fn readable_offset(&self) -> usize {
        BUCKET_HEADER_SIZE + bitmap_bytes(self.capacity)
    }

    #[inline]
    fn slot_offset(&self, index: usize) -> usize {
        debug_assert!(index < self.capacity);
        BUCKET_HEADER_SIZE
            + 2 * bitmap_bytes(self.capacity)
            + index * (K::ENCODED_LEN + V::ENCODED_LEN)
    }

    /// Returns true if slot `index` has ever held a pair.
    #[inline]
    pub fn is_occupied(&self, index: usize) -> bool {
        let byte = self.data[self.occupied_offset() + index / 8];
        byte & (1 << (index % 8)) != 0
    }

    #[inline]
    fn set_occupied(&mut self, index: usize) {
        let offset = self.occupied_offset() + index / 8;
        self.data[offset] |= 1 << (index % 8);
    }

    /// Returns true if slot `index` holds a live pair.
    #[inline]
    pub fn is_readable(&self, index: usize) -> bool {
        let byte = self.data[self.readable_offset() + index / 8];
        byte & (1 << (index % 8)) != 0
    }

    #[inline]
    fn set_readable(&mut self, index: usize) {
        let offset = self.readable_offset() + index / 8;
        self.data[offset] |= 1 << (index % 8);
    }

    #[inline]
    fn clear_readable(&mut self, index: usize) {
        let offset = self.readable_offset() + index / 8;
        self.data[offset] &= !(1 << (index % 8));
    }

    /// Decodes slot `index`'s key.
    #[inline]
    pub fn key_at(&self, index: usize) -> K {
        K::read_from(&self.data[self.slot_offset(index)..])
    }

    /// Decodes slot `index`'s value.
    #[inline]
    pub fn value_at(&self, index: usize) -> V {
        V::read_from(&self.data[self.slot_offset(index) + K::ENCODED_LEN..])
    }

    fn put_at(&mut self, index: usize, key: &K, value: &V) {
        let offset = self.slot_offset(index);
        key.write_to(&mut self.data[offset..]);
        value.write_to(&mut self.data[offset + K::ENCODED_LEN..]);
    }

    /// Appends every live value stored under `key` to `out`.
    ///
    /// Tombstones are skipped; the scan stops at the first never-occupied
    /// slot, which marks the end of the bucket's history.
    pub fn get_value(&self, key: &K, out: &mut Vec<V>) {
        for i in 0..self.capacity {
            if !self.is_occupied(i) {
                break;
            }
            if self.is_readable(i) && self.key_at(i) == *key {
                out.push(self.value_at(i));
            }
        }
    }

    /// Stores `(key, value)` in the first non-readable slot.
    ///
    /// Tombstoned slots are reused. An identical live pair makes this a
    /// duplicate; the same key with a different value is fine.
    pub fn insert(&mut self, key: &K, value: &V) -> BucketInsert {
        let mut free_slot = None;
        for i in 0..self.capacity {
            if !self.is_occupied(i) {
                if free_slot.is_none() {
                    free_slot = Some(i);
                }
                // Nothing was ever stored past this slot.
                break;
            }
            if self.is_readable(i) {
                if self.key_at(i) == *key && self.value_at(i) == *value {
                    return BucketInsert::Duplicate;
                }
            } else if free_slot.is_none() {
                free_slot = Some(i);
            }
        }

        match free_slot {
            Some(i) => {
                self.put_at(i, key, value);
                self.set_occupied(i);
                self.set_readable(i);
                BucketInsert::Inserted
            }
            None => BucketInsert::Full,
        }
    }

    /// Removes the live `(key, value)` pair, leaving a tombstone.
    ///
    /// Returns whether a removal happened.
    pub fn remove(&mut self, key: &K, value: &V) -> bool {
        for i in 0..self.capacity {
            if !self.is_occupied(i) {
                return false;
            }
            if self.is_readable(i) && self.key_at(i) == *key && self.value_at(i) == *value {
                self.clear_readable(i);
                return true;
            }
        }
        false
    }

    /// Number of live pairs.
    pub fn num_readable(&self) -> usize {
        let offset = self.readable_offset();
        self.data[offset..offset + bitmap_bytes(self.capacity)]
            .iter()
            .map(|b| b.count_ones() as usize)
            .sum()
    }

    /// Returns true if every slot holds a live pair.
    pub fn is_full(&self) -> bool {
        self.num_readable() == self.capacity
    }

    /// Returns true if no slot holds a live pair.
    pub fn is_empty(&self) -> bool {
        self.num_readable() == 0
    }

    /// Collects all live pairs, e.g. for redistribution during a split.
    pub fn entries(&self) -> Vec<(K, V)> {
        let mut out = Vec::with_capacity(self.num_readable());
        for i in 0..self.capacity {
            if !self.is_occupied(i) {
                break;
            }
            if self.is_readable(i) {
                out.push((self.key_at(i), self.value_at(i)));
            }
        }
        out
    }

    /// Clears both bitmaps and all slots; the bucket forgets its history.
    pub fn reset(&mut self) {
        self.data[BUCKET_HEADER_SIZE..].fill(0);
    }
}

/// Read-only view of a bucket page.
pub struct BucketPageRef<'a, K, V> {
    data: &'a [u8],
    capacity: usize,
    _marker: PhantomData<(K, V)>,
}

impl<'a, K, V> BucketPageRef<'a, K, V>
where
    K: FixedSlot + Eq,
    V: FixedSlot + Eq,
{
    /// Creates a read-only view into the given page buffer.
    pub fn new(data: &'a [u8]) -> Self {
        let capacity = capacity_for(data.len(), K::ENCODED_LEN + V::ENCODED_LEN);
        assert!(capacity > 0, "page too small for a single bucket slot");
        Self {
            data,
            capacity,
            _marker: PhantomData,
        }
    }

    #[inline]
    fn readable_offset(&self) -> usize {
        BUCKET_HEADER_SIZE + bitmap_bytes(self.capacity)
    }

    #[inline]
    fn slot_offset(&self, index: usize) -> usize {
        BUCKET_HEADER_SIZE
            + 2 * bitmap_bytes(self.capacity)
            + index * (K::ENCODED_LEN + V::ENCODED_LEN)
    }

    /// Returns true if slot `index` has ever held a pair.
    #[inline]
    pub fn is_occupied(&self, index: usize) -> bool {
        let byte = self.data[BUCKET_HEADER_SIZE + index / 8];
        byte & (1 << (index % 8)) != 0
    }

    /// Returns true if slot `index` holds a live pair.
    #[inline]
    pub fn is_readable(&self, index: usize) -> bool {
        let byte = self.data[self.readable_offset() + index / 8];
        byte & (1 << (index % 8)) != 0
    }

    /// Appends every live value stored under `key` to `out`.
    pub fn get_value(&self, key: &K, out: &mut Vec<V>) {
        for i in 0..self.capacity {
            if !self.is_occupied(i) {
                break;
            }
            if self.is_readable(i) && K::read_from(&self.data[self.slot_offset(i)..]) == *key {
                out.push(V::read_from(
                    &self.data[self.slot_offset(i) + K::ENCODED_LEN..],
                ));
            }
        }
    }

    /// Number of live pairs.
    pub fn num_readable(&self) -> usize {
        let offset = self.readable_offset();
        self.data[offset..offset + bitmap_bytes(self.capacity)]
            .iter()
            .map(|b| b.count_ones() as usize)
            .sum()
    }

    /// Returns true if no slot holds a live pair.
    pub fn is_empty(&self) -> bool {
        self.num_readable() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE_SIZE: usize = 4096;

    type TestBucket<'a> = BucketPage<'a, u32, u64>;

    fn create_bucket(buffer: &mut Vec<u8>) -> TestBucket<'_> {
        let mut bucket = TestBucket::new(buffer);
        bucket.init(PageId::new(7));
        bucket
    }

    #[test]
    fn test_capacity_fits_page() {
        let capacity = TestBucket::capacity(PAGE_SIZE);
        let pair = 12;
        assert!(capacity > 0);
        assert!(
            BUCKET_HEADER_SIZE + 2 * bitmap_bytes(capacity) + capacity * pair <= PAGE_SIZE
        );
        // One more slot must not fit.
        assert!(
            BUCKET_HEADER_SIZE + 2 * bitmap_bytes(capacity + 1) + (capacity + 1) * pair
                > PAGE_SIZE
        );
    }

    #[test]
    fn test_insert_and_get() {
        let mut buffer = vec![0u8; PAGE_SIZE];
        let mut bucket = create_bucket(&mut buffer);

        assert_eq!(bucket.insert(&1, &100), BucketInsert::Inserted);
        assert_eq!(bucket.insert(&1, &200), BucketInsert::Inserted);
        assert_eq!(bucket.insert(&2, &300), BucketInsert::Inserted);

        let mut out = Vec::new();
        bucket.get_value(&1, &mut out);
        assert_eq!(out, vec![100, 200]);

        out.clear();
        bucket.get_value(&9, &mut out);
        assert!(out.is_empty());
        assert_eq!(bucket.num_readable(), 3);
    }

    #[test]
    fn test_duplicate_pair_rejected() {
        let mut buffer = vec![0u8; PAGE_SIZE];
        let mut bucket = create_bucket(&mut buffer);

        assert_eq!(bucket.insert(&1, &100), BucketInsert::Inserted);
        assert_eq!(bucket.insert(&1, &100), BucketInsert::Duplicate);
        assert_eq!(bucket.num_readable(), 1);
    }

    #[test]
    fn test_remove_leaves_tombstone() {
        let mut buffer = vec![0u8; PAGE_SIZE];
        let mut bucket = create_bucket(&mut buffer);

        bucket.insert(&1, &100);
        bucket.insert(&2, &200);

        assert!(bucket.remove(&1, &100));
        assert!(!bucket.remove(&1, &100));

        // Occupied survives the removal; readable does not.
        assert!(bucket.is_occupied(0));
        assert!(!bucket.is_readable(0));

        // The pair behind the tombstone is still reachable.
        let mut out = Vec::new();
        bucket.get_value(&2, &mut out);
        assert_eq!(out, vec![200]);
    }

    #[test]
    fn test_insert_reuses_tombstone() {
        let mut buffer = vec![0u8; PAGE_SIZE];
        let mut bucket = create_bucket(&mut buffer);

        bucket.insert(&1, &100);
        bucket.insert(&2, &200);
        bucket.remove(&1, &100);

        assert_eq!(bucket.insert(&3, &300), BucketInsert::Inserted);
        assert_eq!(bucket.key_at(0), 3);
        assert_eq!(bucket.value_at(0), 300);
    }

    #[test]
    fn test_full_bucket_rejects_insert() {
        let mut buffer = vec![0u8; PAGE_SIZE];
        let mut bucket = create_bucket(&mut buffer);

        let capacity = TestBucket::capacity(PAGE_SIZE);
        for i in 0..capacity as u32 {
            assert_eq!(bucket.insert(&i, &u64::from(i)), BucketInsert::Inserted);
        }
        assert!(bucket.is_full());
        assert_eq!(bucket.insert(&99999, &1), BucketInsert::Full);
    }

    #[test]
    fn test_is_empty() {
        let mut buffer = vec![0u8; PAGE_SIZE];
        let mut bucket = create_bucket(&mut buffer);

        assert!(bucket.is_empty());
        bucket.insert(&1, &100);
        assert!(!bucket.is_empty());
        bucket.remove(&1, &100);
        assert!(bucket.is_empty());
    }

    #[test]
    fn test_entries_skips_tombstones() {
        let mut buffer = vec![0u8; PAGE_SIZE];
        let mut bucket = create_bucket(&mut buffer);

        bucket.insert(&1, &100);
        bucket.insert(&2, &200);
        bucket.insert(&3, &300);
        bucket.remove(&2, &200);

        assert_eq!(bucket.entries(), vec![(1, 100), (3, 300)]);
    }

    #[test]
    fn test_reset_forgets_history() {
        let mut buffer = vec![0u8; PAGE_SIZE];
        let mut bucket = create_bucket(&mut buffer);

        bucket.insert(&1, &100);
        bucket.remove(&1, &100);
        bucket.reset();

        assert!(!bucket.is_occupied(0));
        assert!(bucket.is_empty());
        assert_eq!(bucket.page_id(), PageId::new(7));
    }

    #[test]
    fn test_read_only_view_matches() {
        let mut buffer = vec![0u8; PAGE_SIZE];
        {
            let mut bucket = create_bucket(&mut buffer);
            bucket.insert(&5, &500);
            bucket.insert(&5, &501);
            bucket.insert(&6, &600);
            bucket.remove(&5, &501);
        }

        let bucket: BucketPageRef<'_, u32, u64> = BucketPageRef::new(&buffer);
        let mut out = Vec::new();
        bucket.get_value(&5, &mut out);
        assert_eq!(out, vec![500]);
        assert_eq!(bucket.num_readable(), 2);
        assert!(!bucket.is_empty());
        assert!(bucket.is_occupied(1));
        assert!(!bucket.is_readable(1));
    }

    #[test]
    fn test_randomized_slot_churn_matches_model() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};
        use std::collections::HashSet;

        let mut buffer = vec![0u8; PAGE_SIZE];
        let mut bucket = create_bucket(&mut buffer);
        let mut model: HashSet<(u32, u64)> = HashSet::new();
        let mut rng = StdRng::seed_from_u64(0x5EED);

        for _ in 0..3000 {
            let key = rng.gen_range(0..64u32);
            let value = u64::from(rng.gen_range(0..8u32));
            if rng.gen_bool(0.55) {
                match bucket.insert(&key, &value) {
                    BucketInsert::Inserted => assert!(model.insert((key, value))),
                    BucketInsert::Duplicate => assert!(model.contains(&(key, value))),
                    BucketInsert::Full => {
                        assert_eq!(model.len(), TestBucket::capacity(PAGE_SIZE));
                    }
                }
            } else {
                assert_eq!(bucket.remove(&key, &value), model.remove(&(key, value)));
            }
        }

        assert_eq!(bucket.num_readable(), model.len());
        for key in 0..64u32 {
            let mut out = Vec::new();
            bucket.get_value(&key, &mut out);
            out.sort_unstable();
            let mut expected: Vec<u64> = model
                .iter()
                .filter(|(k, _)| *k == key)
                .map(|(_, v)| *v)
                .collect();
            expected.sort_unstable();
            assert_eq!(out, expected, "key {key}");
        }
    }

    #[test]
    fn test_bitmap_boundaries() {
        let mut buffer = vec![0u8; PAGE_SIZE];
        let mut bucket = create_bucket(&mut buffer);

        // Fill slots straddling the first byte boundary of the bitmaps.
        for i in 0..16u32 {
            bucket.insert(&i, &u64::from(i));
        }
        bucket.remove(&7, &7);
        bucket.remove(&8, &8);

        assert!(bucket.is_occupied(7));
        assert!(bucket.is_occupied(8));
        assert!(!bucket.is_readable(7));
        assert!(!bucket.is_readable(8));
        assert!(bucket.is_readable(6));
        assert!(bucket.is_readable(9));
        assert_eq!(bucket.num_readable(), 14);
    }
}
