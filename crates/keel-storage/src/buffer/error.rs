//! Buffer pool errors.

use keel_common::types::PageId;
use thiserror::Error;

use crate::disk::IoError;

/// Result type for buffer pool operations.
pub type BufferResult<T> = Result<T, BufferError>;

/// Errors that can occur during buffer pool operations.
#[derive(Debug, Error)]
#[allow(missing_docs)] // Fields are documented by variant docs
pub enum BufferError {
    /// Every frame is pinned: no free frame and no eviction victim.
    ///
    /// Recoverable - unpin something and retry.
    #[error("buffer pool exhausted: all {pool_size} frames are pinned")]
    PoolExhausted { pool_size: usize },

    /// The operation targeted a page that is not in the page table.
    #[error("page {page_id} is not resident in the buffer pool")]
    NotResident { page_id: PageId },

    /// `delete_page` on a page with outstanding pins.
    #[error("page {page_id} still has {pin_count} outstanding pins")]
    StillPinned { page_id: PageId, pin_count: u32 },

    /// `unpin_page` on a page whose pin count is already zero.
    ///
    /// Signals a pin/unpin pairing bug in the caller; no state changed.
    #[error("page {page_id} unpinned with pin count already zero")]
    DoubleUnpin { page_id: PageId },

    /// Disk I/O failed while reading or writing a page.
    #[error("disk I/O error: {source}")]
    Io {
        #[from]
        source: IoError,
    },

    /// Configuration error.
    #[error("configuration error: {message}")]
    Config { message: String },
}

impl BufferError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Returns true if this error clears up once callers unpin pages.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::PoolExhausted { .. } | Self::StillPinned { .. }
        )
    }
}
