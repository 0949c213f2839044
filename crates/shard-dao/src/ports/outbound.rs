//! # Outbound Ports
//!
//! What the sharding layer requires from a storage engine: one independently
//! connected partition per shard, each able to run transactions with
//! row locks, unique keys, criteria selects and named bulk updates.
//!
//! Production engines implement these over their native session and
//! transaction primitives; `InMemoryShardStore` implements them for tests.

use serde_json::Value;

use crate::domain::{
    Criteria, LockMode, NamedUpdate, RowId, ShardError, ShardId, UpdateOperationMeta,
};

/// Row as stored: surrogate id plus document (which also carries the id).
#[derive(Clone, Debug, PartialEq)]
pub struct StoredRow {
    /// Surrogate id.
    pub id: RowId,
    /// Stored document.
    pub doc: Value,
}

/// Set of shards - outbound port.
pub trait ShardStore: Send + Sync {
    /// Number of shards served.
    fn shard_count(&self) -> u16;

    /// Begin a transaction on `shard`.
    fn begin(&self, shard: ShardId) -> Result<Box<dyn ShardTransaction>, ShardError>;

    /// Register a named bulk update.
    fn register_named_update(&self, name: &str, query: NamedUpdate) -> Result<(), ShardError>;
}

/// Transaction scoped to a single shard - outbound port.
///
/// Writes are invisible to other transactions until `commit`. Row locks are
/// held until `commit` or `rollback`. Dropping an unfinished transaction
/// must behave like `rollback`.
pub trait ShardTransaction: Send {
    /// Shard this transaction runs on.
    fn shard(&self) -> ShardId;

    /// Insert a document, assigning its id. With `unique_key`, fails with
    /// [`ShardError::UniquenessConflict`] if the key is already taken.
    /// The new row is locked by this transaction.
    fn insert(
        &mut self,
        table: &str,
        unique_key: Option<&str>,
        doc: Value,
    ) -> Result<StoredRow, ShardError>;

    /// Read a row by id.
    fn get(&mut self, table: &str, id: RowId, lock: LockMode)
        -> Result<Option<StoredRow>, ShardError>;

    /// Read a row by unique key.
    fn find_by_key(
        &mut self,
        table: &str,
        key: &str,
        lock: LockMode,
    ) -> Result<Option<StoredRow>, ShardError>;

    /// Replace a row's document, locking the row.
    fn update(&mut self, table: &str, id: RowId, doc: Value) -> Result<(), ShardError>;

    /// Delete a row, locking it first. Returns whether it existed.
    fn delete(&mut self, table: &str, id: RowId) -> Result<bool, ShardError>;

    /// Rows matching `criteria`, ordered, windowed by `offset`/`limit`.
    ///
    /// With [`LockMode::Exclusive`] every returned row is locked and was
    /// matched against `criteria` again after its lock was taken, so no
    /// returned row can have stopped matching. Candidates are locked in
    /// order only until the window is filled.
    fn select(
        &mut self,
        table: &str,
        criteria: &Criteria,
        offset: usize,
        limit: usize,
        lock: LockMode,
    ) -> Result<Vec<StoredRow>, ShardError>;

    /// Run a registered named update against `table`; returns affected rows.
    fn execute_named(
        &mut self,
        table: &str,
        meta: &UpdateOperationMeta,
    ) -> Result<usize, ShardError>;

    /// Make all writes visible and release locks.
    fn commit(self: Box<Self>) -> Result<(), ShardError>;

    /// Discard all writes and release locks.
    fn rollback(self: Box<Self>) -> Result<(), ShardError>;
}
