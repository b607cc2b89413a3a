//! I/O error types for the disk layer.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for disk I/O operations.
pub type IoResult<T> = Result<T, IoError>;

/// Errors that can occur during disk I/O operations.
#[derive(Debug, Error)]
#[allow(missing_docs)] // Fields are documented by variant docs
pub enum IoError {
    /// Standard I/O error.
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    /// Failed to open the backing file.
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Buffer length does not match the page size.
    #[error("buffer length {actual} does not match page size {expected}")]
    BufferLength { expected: usize, actual: usize },

    /// Operation addressed the invalid page id sentinel.
    #[error("operation addressed the invalid page id")]
    InvalidPageId,
}

impl IoError {
    /// Creates an open error carrying the offending path.
    pub fn open(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Open {
            path: path.into(),
            source,
        }
    }
}
