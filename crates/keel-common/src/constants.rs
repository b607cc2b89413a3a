//! System-wide constants for KeelDB.
//!
//! This module defines the page geometry, buffer pool defaults, and
//! hash-index limits used across the storage engine.

// =============================================================================
// Page Constants
// =============================================================================

/// Default page size in bytes (4 KB).
///
/// Matches the typical SSD block size and OS page size, so a page is the
/// natural unit of disk I/O.
pub const DEFAULT_PAGE_SIZE: usize = 4 * 1024;

/// Minimum page size in bytes (512 B).
pub const MIN_PAGE_SIZE: usize = 512;

/// Maximum page size in bytes (64 KB).
pub const MAX_PAGE_SIZE: usize = 64 * 1024;

// =============================================================================
// Buffer Pool Constants
// =============================================================================

/// Default number of frames in a single buffer pool instance.
pub const DEFAULT_POOL_SIZE: usize = 128;

/// Default number of buffer pool instances in a parallel pool.
pub const DEFAULT_NUM_INSTANCES: usize = 1;

// =============================================================================
// Hash Index Constants
// =============================================================================

/// Maximum global depth of an extendible hash directory.
///
/// The directory never grows past `2^MAX_GLOBAL_DEPTH` entries; inserts
/// that would require a tenth doubling fail instead.
pub const MAX_GLOBAL_DEPTH: u32 = 9;

/// Number of entry slots in a directory page (`2^MAX_GLOBAL_DEPTH`).
pub const DIRECTORY_ARRAY_SIZE: usize = 1 << MAX_GLOBAL_DEPTH;
