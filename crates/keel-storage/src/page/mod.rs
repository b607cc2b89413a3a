//! Typed views over raw page bytes.
//!
//! The buffer pool hands out pinned byte buffers; the extendible hash
//! index reinterprets them through the views in this module. A view
//! borrows the frame's data lock, decodes and encodes fields at fixed
//! little-endian offsets, and must be dropped before the page is
//! unpinned.
//!
//! - [`DirectoryPage`] / [`DirectoryPageRef`]: the hash directory
//!   meta-page (global depth, per-entry local depths and bucket ids)
//! - [`BucketPage`] / [`BucketPageRef`]: a slotted bucket with
//!   occupied/readable bitmaps and fixed-width `(key, value)` slots

mod bucket;
mod directory;

pub use bucket::{BucketInsert, BucketPage, BucketPageRef};
pub use directory::{DirectoryPage, DirectoryPageRef, DIRECTORY_PAGE_DATA_SIZE};
