//! # Algorithms Module
//!
//! Shard routing: bucket extraction, bucket-to-shard strategies and the
//! calculator composing them.

pub mod bucket;
pub mod shard_calculator;
pub mod shard_manager;

pub use bucket::{hashed_bucket, parse_bucket};
pub use shard_calculator::ShardCalculator;
pub use shard_manager::ShardManager;
