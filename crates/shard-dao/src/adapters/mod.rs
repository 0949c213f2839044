//! # Adapters Module
//!
//! Storage engine implementations of the outbound ports.

mod criteria_eval;
pub mod memory;
mod row_locks;

pub use memory::{InMemoryShardStore, DEFAULT_LOCK_WAIT};
