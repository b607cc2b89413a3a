//! Extendible hash directory meta-page.
//!
//! The directory maps the low `global_depth` bits of a key's hash to a
//! bucket page id. Entries sharing the low `local_depth` bits point to the
//! same bucket; the directory always holds exactly `2^global_depth` live
//! entries.
//!
//! # Page Layout
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//!   0       4   page_id
//!   4       8   lsn
//!  12       4   global_depth
//!  16     512   local_depths  (u8 per entry)
//! 528    2048   bucket_page_ids (u32 per entry)
//! ```

use keel_common::constants::{DIRECTORY_ARRAY_SIZE, MAX_GLOBAL_DEPTH};
use keel_common::types::{Lsn, PageId};

const PAGE_ID_OFFSET: usize = 0;
const LSN_OFFSET: usize = 4;
const GLOBAL_DEPTH_OFFSET: usize = 12;
const LOCAL_DEPTHS_OFFSET: usize = 16;
const BUCKET_IDS_OFFSET: usize = LOCAL_DEPTHS_OFFSET + DIRECTORY_ARRAY_SIZE;

/// Number of bytes the directory occupies at the front of its page.
pub const DIRECTORY_PAGE_DATA_SIZE: usize = BUCKET_IDS_OFFSET + 4 * DIRECTORY_ARRAY_SIZE;

/// Mutable view of a directory page.
///
/// # Example
///
/// ```rust
/// use keel_storage::page::DirectoryPage;
/// use keel_common::types::PageId;
///
/// let mut buffer = vec![0u8; 4096];
/// let mut dir = DirectoryPage::new(&mut buffer);
/// dir.init(PageId::new(1));
/// dir.set_bucket_page_id(0, PageId::new(2));
/// assert_eq!(dir.size(), 1);
/// ```
pub struct DirectoryPage<'a> {
    data: &'a mut [u8],
}

impl<'a> DirectoryPage<'a> {
    /// Creates a view into the given page buffer.
    ///
    /// # Panics
    ///
    /// Panics if the buffer cannot hold the directory.
    pub fn new(data: &'a mut [u8]) -> Self {
        assert!(
            data.len() >= DIRECTORY_PAGE_DATA_SIZE,
            "buffer too small for directory page"
        );
        Self { data }
    }

    /// Initializes an empty directory: global depth 0, one entry with
    /// local depth 0 and no bucket assigned yet.
    pub fn init(&mut self, page_id: PageId) {
        self.set_page_id(page_id);
        self.set_lsn(Lsn::INVALID);
        self.set_global_depth(0);
        for i in 0..DIRECTORY_ARRAY_SIZE {
            self.set_local_depth(i, 0);
            self.set_bucket_page_id(i, PageId::INVALID);
        }
    }

    /// Returns the directory page's own id.
    #[inline]
    pub fn page_id(&self) -> PageId {
        PageId::from_le_bytes(self.data[PAGE_ID_OFFSET..PAGE_ID_OFFSET + 4].try_into().unwrap())
    }

    /// Sets the directory page's own id.
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

    /// Returns the global depth.
    #[inline]
    pub fn global_depth(&self) -> u32 {
        u32::from_le_bytes(
            self.data[GLOBAL_DEPTH_OFFSET..GLOBAL_DEPTH_OFFSET + 4]
                .try_into()
                .unwrap(),
        )
    }

    #[inline]
    fn set_global_depth(&mut self, depth: u32) {
        self.data[GLOBAL_DEPTH_OFFSET..GLOBAL_DEPTH_OFFSET + 4]
            .copy_from_slice(&depth.to_le_bytes());
    }

    /// Returns the number of live directory entries (`2^global_depth`).
    #[inline]
    pub fn size(&self) -> usize {
        1 << self.global_depth()
    }

    /// Mask selecting the hash bits that index the directory.
    #[inline]
    pub fn global_depth_mask(&self) -> u32 {
        (self.size() - 1) as u32
    }

    /// Returns entry `index`'s local depth.
    #[inline]
    pub fn local_depth(&self, index: usize) -> u32 {
        debug_assert!(index < DIRECTORY_ARRAY_SIZE);
        u32::from(self.data[LOCAL_DEPTHS_OFFSET + index])
    }

    /// Sets entry `index`'s local depth.
    #[inline]
    pub fn set_local_depth(&mut self, index: usize, depth: u32) {
        debug_assert!(index < DIRECTORY_ARRAY_SIZE);
        debug_assert!(depth <= MAX_GLOBAL_DEPTH);
        self.data[LOCAL_DEPTHS_OFFSET + index] = depth as u8;
    }

    /// Mask selecting the hash bits that route to entry `index`'s bucket.
    #[inline]
    pub fn local_depth_mask(&self, index: usize) -> u32 {
        (1u32 << self.local_depth(index)) - 1
    }

    /// Returns entry `index`'s bucket page id.
    #[inline]
    pub fn bucket_page_id(&self, index: usize) -> PageId {
        debug_assert!(index < DIRECTORY_ARRAY_SIZE);
        let offset = BUCKET_IDS_OFFSET + index * 4;
        PageId::from_le_bytes(self.data[offset..offset + 4].try_into().unwrap())
    }

    /// Sets entry `index`'s bucket page id.
    #[inline]
    pub fn set_bucket_page_id(&mut self, index: usize, page_id: PageId) {
        debug_assert!(index < DIRECTORY_ARRAY_SIZE);
        let offset = BUCKET_IDS_OFFSET + index * 4;
        self.data[offset..offset + 4].copy_from_slice(&page_id.to_le_bytes());
    }

    /// Index of the sibling entry produced by splitting entry `index` at
    /// its current local depth: flips the highest covered bit.
    ///
    /// Only meaningful for entries with local depth > 0.
    #[inline]
    pub fn split_image_index(&self, index: usize) -> usize {
        let depth = self.local_depth(index);
        debug_assert!(depth > 0, "entry at depth 0 has no split image");
        index ^ (1 << (depth - 1))
    }

    /// Doubles the directory by mirroring entries `[0, size)` into
    /// `[size, 2*size)`.
    ///
    /// # Panics
    ///
    /// Panics if the directory is already at maximum depth.
    pub fn incr_global_depth(&mut self) {
        let depth = self.global_depth();
        assert!(
            depth < MAX_GLOBAL_DEPTH,
            "directory already at maximum depth"
        );
        let size = self.size();
        for i in 0..size {
            let local_depth = self.local_depth(i);
            let bucket = self.bucket_page_id(i);
            self.set_local_depth(size + i, local_depth);
            self.set_bucket_page_id(size + i, bucket);
        }
        self.set_global_depth(depth + 1);
    }

    /// Halves the directory.
    ///
    /// # Panics
    ///
    /// Panics if any entry's local depth equals the global depth.
    pub fn decr_global_depth(&mut self) {
        let depth = self.global_depth();
        assert!(depth > 0, "cannot shrink a directory of size 1");
        assert!(self.can_shrink(), "an entry still uses the full depth");
        self.set_global_depth(depth - 1);
    }

    /// Returns true when every entry's local depth is strictly below the
    /// global depth, i.e. the upper half mirrors the lower half.
    pub fn can_shrink(&self) -> bool {
        let global_depth = self.global_depth();
        if global_depth == 0 {
            return false;
        }
        (0..self.size()).all(|i| self.local_depth(i) < global_depth)
    }

    /// Checks the directory invariants, panicking on violation.
    ///
    /// See [`DirectoryPageRef::verify_integrity`].
    pub fn verify_integrity(&self) {
        DirectoryPageRef::new(&self.data).verify_integrity();
    }
}

/// Read-only view of a directory page.
pub struct DirectoryPageRef<'a> {
    data: &'a [u8],
}

impl<'a> DirectoryPageRef<'a> {
    /// Creates a read-only view into the given page buffer.
    ///
    /// # Panics
    ///
    /// Panics if the buffer cannot hold the directory.
    pub fn new(data: &'a [u8]) -> Self {
        assert!(
            data.len() >= DIRECTORY_PAGE_DATA_SIZE,
            "buffer too small for directory page"
        );
        Self { data }
    }

    /// Returns the global depth.
    #[inline]
    pub fn global_depth(&self) -> u32 {
        u32::from_le_bytes(
            self.data[GLOBAL_DEPTH_OFFSET..GLOBAL_DEPTH_OFFSET + 4]
                .try_into()
                .unwrap(),
        )
    }

    /// Returns the number of live directory entries.
    #[inline]
    pub fn size(&self) -> usize {
        1 << self.global_depth()
    }

    /// Mask selecting the hash bits that index the directory.
    #[inline]
    pub fn global_depth_mask(&self) -> u32 {
        (self.size() - 1) as u32
    }

    /// Returns entry `index`'s local depth.
    #[inline]
    pub fn local_depth(&self, index: usize) -> u32 {
        debug_assert!(index < DIRECTORY_ARRAY_SIZE);
        u32::from(self.data[LOCAL_DEPTHS_OFFSET + index])
    }

    /// Returns entry `index`'s bucket page id.
    #[inline]
    pub fn bucket_page_id(&self, index: usize) -> PageId {
        debug_assert!(index < DIRECTORY_ARRAY_SIZE);
        let offset = BUCKET_IDS_OFFSET + index * 4;
        PageId::from_le_bytes(self.data[offset..offset + 4].try_into().unwrap())
    }

    /// Mask selecting the hash bits that route to entry `index`'s bucket.
    #[inline]
    pub fn local_depth_mask(&self, index: usize) -> u32 {
        (1u32 << self.local_depth(index)) - 1
    }

    /// Checks the directory invariants, panicking on violation:
    ///
    /// - the directory size is exactly `2^global_depth`
    /// - every entry's local depth is at most the global depth
    /// - all entries sharing the low `local_depth` bits point to the same
    ///   bucket page and report the same local depth
    pub fn verify_integrity(&self) {
        let size = self.size();
        assert!(size <= DIRECTORY_ARRAY_SIZE);
        assert!(size.is_power_of_two());

        for i in 0..size {
            let local_depth = self.local_depth(i);
            assert!(
                local_depth <= self.global_depth(),
                "entry {i}: local depth {local_depth} exceeds global depth"
            );
            let bucket = self.bucket_page_id(i);
            assert!(bucket.is_valid(), "entry {i}: unassigned bucket page");

            let mask = self.local_depth_mask(i) as usize;
            for j in 0..size {
                if j & mask == i & mask {
                    assert_eq!(
                        self.bucket_page_id(j),
                        bucket,
                        "entries {i} and {j} share low bits but disagree on bucket"
                    );
                    assert_eq!(
                        self.local_depth(j),
                        local_depth,
                        "entries {i} and {j} share a bucket but disagree on depth"
                    );
                }
            }
        }
    }
}
