//! # Ports Module
//!
//! Storage boundary traits (hexagonal architecture).

pub mod outbound;

pub use outbound::{ShardStore, ShardTransaction, StoredRow};
