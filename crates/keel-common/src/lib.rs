//! # keel-common
//!
//! Common types and constants for KeelDB.
//!
//! This crate provides the foundational pieces shared by the storage and
//! index layers:
//!
//! - **Types**: core identifiers (`PageId`, `Lsn`) and the fixed-width
//!   slot codec used by on-page key/value storage
//! - **Constants**: page geometry, pool defaults, and hash-index limits
//!
//! ## Example
//!
//! ```rust
//! use keel_common::types::PageId;
//!
//! let page_id = PageId::new(42);
//! assert!(page_id.is_valid());
//! assert!(!PageId::INVALID.is_valid());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod constants;
pub mod types;

// Re-export commonly used items at the crate root
pub use constants::*;
pub use types::{FixedSlot, Lsn, PageId};
