//! Core types for KeelDB.

mod ids;
mod slot;

pub use ids::{Lsn, PageId};
pub use slot::FixedSlot;
