//! Hash index errors.

use keel_common::constants::MAX_GLOBAL_DEPTH;
use keel_storage::buffer::BufferError;
use thiserror::Error;

/// Result type for hash index operations.
pub type IndexResult<T> = Result<T, IndexError>;

/// Errors that can occur during hash index operations.
#[derive(Debug, Error)]
#[allow(missing_docs)] // Fields are documented by variant docs
pub enum IndexError {
    /// A split would grow the directory past its maximum depth.
    ///
    /// The directory is capped at `2^MAX_GLOBAL_DEPTH` entries by design;
    /// the insert that needed the split fails.
    #[error("hash directory is at maximum depth {max_depth}, cannot split further")]
    DirectoryFull { max_depth: u32 },

    /// The identical (key, value) pair is already present.
    #[error("identical (key, value) pair is already present")]
    DuplicateEntry,

    /// The buffer pool failed underneath the index.
    #[error(transparent)]
    Buffer(#[from] BufferError),
}

impl IndexError {
    /// Creates a directory-full error at the configured cap.
    pub(crate) fn directory_full() -> Self {
        Self::DirectoryFull {
            max_depth: MAX_GLOBAL_DEPTH,
        }
    }

    /// Returns true if this error clears up once callers unpin pages.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Buffer(e) if e.is_retryable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_full_display() {
        let err = IndexError::directory_full();
        assert_eq!(
            err.to_string(),
            "hash directory is at maximum depth 9, cannot split further"
        );
    }

    #[test]
    fn test_is_retryable() {
        assert!(!IndexError::DuplicateEntry.is_retryable());
        assert!(IndexError::Buffer(BufferError::PoolExhausted { pool_size: 4 }).is_retryable());
    }
}
