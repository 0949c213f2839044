//! # DAO Module
//!
//! Shard-aware accessors and the locking executor built on them.

pub mod locked;
pub mod lookup;
pub mod relational;
mod transaction;

pub use locked::LockedContext;
pub use lookup::LookupDao;
pub use relational::RelationalDao;
