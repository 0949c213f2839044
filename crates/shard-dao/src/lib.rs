//! # Shard DAO
//!
//! Shard routing plus lock-protected chained execution over a fixed set of
//! independently connected storage partitions.
//!
//! **Architecture:** Hexagonal (DDD + Ports/Adapters)
//!
//! ## Purpose
//!
//! - Map a business shard key to a shard index, under the uniform
//!   `Balanced` strategy or the range-based `Legacy` strategy kept for
//!   data written before `Balanced` existed
//! - Keyed (parent) and relational (child) accessors confined to the shard
//!   owning the key
//! - A locking executor: lock a parent, optionally gate on a predicate,
//!   queue child operations and a parent mutation, then commit all of it
//!   atomically or roll all of it back
//!
//! ## Error Categories
//!
//! | Kind | Raised by |
//! |------|-----------|
//! | `InvalidConfiguration` | manager/accessor construction |
//! | `NotFound` | `lock_and_get_executor` on an absent key |
//! | `UniquenessConflict` | duplicate parent key, from the storage engine |
//! | `Validation` | producers, `validate()`, shard key changes |
//! | `Concurrency` | lock-wait timeout |
//!
//! A vetoed filter is not an error: nothing queued runs and the
//! transaction commits cleanly.
//!
//! ## Module Structure
//!
//! ```text
//! shard-dao/
//! ├── domain/          # Errors, value objects, entity contracts, criteria
//! ├── algorithms/      # Shard manager, calculator, bucket extraction
//! ├── ports/           # Storage boundary traits
//! ├── adapters/        # In-memory multi-shard store
//! ├── dao/             # Lookup/relational accessors, locking executor
//! └── config.rs        # ShardingConfig
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! let parent = lookup.lock_and_get_executor("0")?
//!     .filter(|p| !p.name.is_empty())
//!     .save(&children, |p| Ok(Child::new(&p.my_id, "Hello")))
//!     .mutate(|p| p.name = "Changed".into())
//!     .execute()?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapters;
pub mod algorithms;
pub mod config;
pub mod dao;
pub mod domain;
pub mod ports;

// Re-exports
pub use adapters::{InMemoryShardStore, DEFAULT_LOCK_WAIT};
pub use algorithms::{hashed_bucket, parse_bucket, ShardCalculator, ShardManager};
pub use config::ShardingConfig;
pub use dao::{LockedContext, LookupDao, RelationalDao};
pub use domain::{
    invariant_deterministic_assignment, invariant_shard_in_range, BucketId, Criteria, ErrorKind,
    ExecutorState, LockMode, LookupEntity, NamedUpdate, Order, RelationalEntity, Restriction,
    RowId, ShardError, ShardId, ShardStrategy, UpdateOperationMeta, HASHED_BUCKET_SPACE,
    ID_COLUMN, LEGACY_BUCKET_SPACE, MAX_LEGACY_SHARD_COUNT, MIN_LEGACY_SHARD_COUNT,
};
pub use ports::{ShardStore, ShardTransaction, StoredRow};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
