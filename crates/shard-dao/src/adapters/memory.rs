//! # In-Memory Shard Store
//!
//! One independent partition per shard. Each partition keeps committed
//! tables behind a `RwLock` and a row lock table; transactions stage their
//! writes privately and apply them atomically on commit.
//!
//! Isolation is read-committed plus exclusive row locks: a transaction
//! sees committed data overlaid with its own staged writes, and every row
//! it writes (or reads with [`LockMode::Exclusive`]) stays locked until it
//! commits or rolls back.

use parking_lot::RwLock;
use serde_json::Value;
use shard_telemetry::UNIQUENESS_CONFLICTS;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::criteria_eval::{compare_rows, matches};
use super::row_locks::{LockSlot, RowLocks, TxId};
use crate::config::ShardingConfig;
use crate::domain::{
    Criteria, LockMode, NamedUpdate, RowId, ShardError, ShardId, UpdateOperationMeta, ID_COLUMN,
};
use crate::ports::{ShardStore, ShardTransaction, StoredRow};

/// Lock wait used when none is configured.
pub const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(5);

struct CommittedRow {
    key: Option<String>,
    doc: Value,
}

#[derive(Default)]
struct Table {
    rows: BTreeMap<RowId, CommittedRow>,
    keys: HashMap<String, RowId>,
    last_id: RowId,
}

#[derive(Default)]
struct ShardData {
    tables: RwLock<HashMap<String, Table>>,
    locks: RowLocks,
}

type NamedUpdates = Arc<RwLock<HashMap<String, NamedUpdate>>>;

/// In-memory [`ShardStore`].
pub struct InMemoryShardStore {
    shards: Vec<Arc<ShardData>>,
    named_updates: NamedUpdates,
    lock_wait: Duration,
    next_tx: AtomicU64,
}

impl InMemoryShardStore {
    /// Store with `shard_count` empty shards and the default lock wait.
    pub fn with_shards(shard_count: u16) -> Self {
        Self::with_lock_wait(shard_count, DEFAULT_LOCK_WAIT)
    }

    /// Store with `shard_count` empty shards; lock waits give up after `lock_wait`.
    pub fn with_lock_wait(shard_count: u16, lock_wait: Duration) -> Self {
        Self {
            shards: (0..shard_count)
                .map(|_| Arc::new(ShardData::default()))
                .collect(),
            named_updates: Arc::new(RwLock::new(HashMap::new())),
            lock_wait,
            next_tx: AtomicU64::new(0),
        }
    }

    /// Store sized and tuned from configuration.
    pub fn from_config(config: &ShardingConfig) -> Result<Self, ShardError> {
        config.validate()?;
        Ok(Self::with_lock_wait(
            config.shard_count,
            config.lock_wait_timeout(),
        ))
    }

    /// Committed row count of `table` on `shard`.
    pub fn row_count(&self, shard: ShardId, table: &str) -> Result<usize, ShardError> {
        let data = self.shard_data(shard)?;
        let tables = data.tables.read();
        Ok(tables.get(table).map_or(0, |t| t.rows.len()))
    }

    fn shard_data(&self, shard: ShardId) -> Result<&Arc<ShardData>, ShardError> {
        self.shards
            .get(usize::from(shard))
            .ok_or(ShardError::UnknownShard(shard))
    }
}

impl ShardStore for InMemoryShardStore {
    fn shard_count(&self) -> u16 {
        self.shards.len() as u16
    }

    fn begin(&self, shard: ShardId) -> Result<Box<dyn ShardTransaction>, ShardError> {
        let data = Arc::clone(self.shard_data(shard)?);
        let tx_id = self.next_tx.fetch_add(1, Ordering::Relaxed) + 1;
        debug!("[shard-dao] begin tx {} on shard {}", tx_id, shard);
        Ok(Box::new(MemoryTransaction {
            tx_id,
            shard,
            data,
            named_updates: Arc::clone(&self.named_updates),
            lock_wait: self.lock_wait,
            writes: BTreeMap::new(),
            held: HashSet::new(),
            finished: false,
        }))
    }

    fn register_named_update(&self, name: &str, query: NamedUpdate) -> Result<(), ShardError> {
        if query.filter_columns.is_empty() && query.set_columns.is_empty() {
            return Err(ShardError::validation(format!(
                "named update {name} has no columns"
            )));
        }
        if query.set_columns.iter().any(|column| column == ID_COLUMN) {
            return Err(ShardError::validation(format!(
                "named update {name} may not set the engine-owned {ID_COLUMN} column"
            )));
        }
        self.named_updates.write().insert(name.to_string(), query);
        Ok(())
    }
}

enum StagedWrite {
    Insert { key: Option<String>, doc: Value },
    Update(Value),
    Delete,
}

struct MemoryTransaction {
    tx_id: TxId,
    shard: ShardId,
    data: Arc<ShardData>,
    named_updates: NamedUpdates,
    lock_wait: Duration,
    writes: BTreeMap<LockSlot, StagedWrite>,
    held: HashSet<LockSlot>,
    finished: bool,
}

impl MemoryTransaction {
    fn lock(&mut self, table: &str, id: RowId) -> Result<(), ShardError> {
        let slot = (table.to_string(), id);
        if self.held.contains(&slot) {
            return Ok(());
        }
        self.data
            .locks
            .acquire(self.tx_id, table, id, self.lock_wait)?;
        self.held.insert(slot);
        Ok(())
    }

    fn visible(&self, tables: &HashMap<String, Table>, table: &str, id: RowId) -> Option<Value> {
        match self.writes.get(&(table.to_string(), id)) {
            Some(StagedWrite::Insert { doc, .. }) | Some(StagedWrite::Update(doc)) => {
                Some(doc.clone())
            }
            Some(StagedWrite::Delete) => None,
            None => tables
                .get(table)
                .and_then(|t| t.rows.get(&id))
                .map(|row| row.doc.clone()),
        }
    }

    fn visible_row(&self, table: &str, id: RowId) -> Option<StoredRow> {
        let tables = self.data.tables.read();
        self.visible(&tables, table, id)
            .map(|doc| StoredRow { id, doc })
    }

    fn staged_key_owner(&self, table: &str, key: &str) -> Option<RowId> {
        self.writes.iter().find_map(|((t, id), write)| match write {
            StagedWrite::Insert { key: Some(k), .. } if t == table && k == key => Some(*id),
            _ => None,
        })
    }

    fn committed_key_owner(&self, table: &str, key: &str) -> Option<RowId> {
        let tables = self.data.tables.read();
        tables.get(table).and_then(|t| t.keys.get(key).copied())
    }

    fn key_taken(&self, table: &str, key: &str) -> bool {
        if self.staged_key_owner(table, key).is_some() {
            return true;
        }
        match self.committed_key_owner(table, key) {
            Some(id) => !matches!(
                self.writes.get(&(table.to_string(), id)),
                Some(StagedWrite::Delete)
            ),
            None => false,
        }
    }

    fn visible_rows(&self, table: &str) -> Vec<StoredRow> {
        let tables = self.data.tables.read();
        let mut rows: BTreeMap<RowId, Value> = tables
            .get(table)
            .map(|t| {
                t.rows
                    .iter()
                    .map(|(id, row)| (*id, row.doc.clone()))
                    .collect()
            })
            .unwrap_or_default();
        drop(tables);

        for ((t, id), write) in &self.writes {
            if t != table {
                continue;
            }
            match write {
                StagedWrite::Insert { doc, .. } | StagedWrite::Update(doc) => {
                    rows.insert(*id, doc.clone());
                }
                StagedWrite::Delete => {
                    rows.remove(id);
                }
            }
        }

        rows.into_iter()
            .map(|(id, doc)| StoredRow { id, doc })
            .collect()
    }

    fn stage_update(&mut self, table: &str, id: RowId, doc: Value) {
        let slot = (table.to_string(), id);
        match self.writes.get_mut(&slot) {
            Some(StagedWrite::Insert { doc: staged, .. }) => *staged = doc,
            _ => {
                self.writes.insert(slot, StagedWrite::Update(doc));
            }
        }
    }

    /// Unique key that would collide at commit time, if any.
    fn commit_conflict(&self, tables: &HashMap<String, Table>) -> Option<(String, String)> {
        self.writes.iter().find_map(|((table, id), write)| {
            let StagedWrite::Insert { key: Some(key), .. } = write else {
                return None;
            };
            let owner = tables.get(table)?.keys.get(key)?;
            let owner_deleted = matches!(
                self.writes.get(&(table.clone(), *owner)),
                Some(StagedWrite::Delete)
            );
            (owner != id && !owner_deleted).then(|| (table.clone(), key.clone()))
        })
    }

    fn release(&mut self) {
        let held = std::mem::take(&mut self.held);
        self.data.locks.release_all(self.tx_id, held);
        self.writes.clear();
        self.finished = true;
    }
}

fn stamp_id(mut doc: Value, id: RowId) -> Result<Value, ShardError> {
    let object = doc
        .as_object_mut()
        .ok_or_else(|| ShardError::Storage("stored documents must be JSON objects".into()))?;
    object.insert(ID_COLUMN.to_string(), Value::from(id));
    Ok(doc)
}

impl ShardTransaction for MemoryTransaction {
    fn shard(&self) -> ShardId {
        self.shard
    }

    fn insert(
        &mut self,
        table: &str,
        unique_key: Option<&str>,
        doc: Value,
    ) -> Result<StoredRow, ShardError> {
        if !doc.is_object() {
            return Err(ShardError::Storage(
                "stored documents must be JSON objects".into(),
            ));
        }
        if let Some(key) = unique_key {
            if self.key_taken(table, key) {
                UNIQUENESS_CONFLICTS.inc();
                return Err(ShardError::UniquenessConflict {
                    table: table.to_string(),
                    key: key.to_string(),
                    shard: self.shard,
                });
            }
        }

        let id = {
            let mut tables = self.data.tables.write();
            let t = tables.entry(table.to_string()).or_default();
            t.last_id += 1;
            t.last_id
        };
        let doc = stamp_id(doc, id)?;
        self.lock(table, id)?;
        self.writes.insert(
            (table.to_string(), id),
            StagedWrite::Insert {
                key: unique_key.map(str::to_owned),
                doc: doc.clone(),
            },
        );
        Ok(StoredRow { id, doc })
    }

    fn get(
        &mut self,
        table: &str,
        id: RowId,
        lock: LockMode,
    ) -> Result<Option<StoredRow>, ShardError> {
        if lock == LockMode::Exclusive {
            self.lock(table, id)?;
        }
        Ok(self.visible_row(table, id))
    }

    fn find_by_key(
        &mut self,
        table: &str,
        key: &str,
        lock: LockMode,
    ) -> Result<Option<StoredRow>, ShardError> {
        if let Some(id) = self.staged_key_owner(table, key) {
            return Ok(self.visible_row(table, id));
        }
        loop {
            let Some(id) = self.committed_key_owner(table, key) else {
                return Ok(None);
            };
            if lock == LockMode::Exclusive {
                self.lock(table, id)?;
                // The key may have moved while we waited.
                if self.committed_key_owner(table, key) != Some(id) {
                    continue;
                }
            }
            return Ok(self.visible_row(table, id));
        }
    }

    fn update(&mut self, table: &str, id: RowId, doc: Value) -> Result<(), ShardError> {
        self.lock(table, id)?;
        if self.visible_row(table, id).is_none() {
            return Err(ShardError::NotFound {
                table: table.to_string(),
                key: format!("id {id}"),
            });
        }
        let doc = stamp_id(doc, id)?;
        self.stage_update(table, id, doc);
        Ok(())
    }

    fn delete(&mut self, table: &str, id: RowId) -> Result<bool, ShardError> {
        self.lock(table, id)?;
        if self.visible_row(table, id).is_none() {
            return Ok(false);
        }
        let slot = (table.to_string(), id);
        if matches!(self.writes.get(&slot), Some(StagedWrite::Insert { .. })) {
            self.writes.remove(&slot);
        } else {
            self.writes.insert(slot, StagedWrite::Delete);
        }
        Ok(true)
    }

    fn select(
        &mut self,
        table: &str,
        criteria: &Criteria,
        offset: usize,
        limit: usize,
        lock: LockMode,
    ) -> Result<Vec<StoredRow>, ShardError> {
        let mut rows: Vec<StoredRow> = self
            .visible_rows(table)
            .into_iter()
            .filter(|row| matches(criteria, &row.doc))
            .collect();
        rows.sort_by(|a, b| compare_rows(criteria, a, b));
        if lock == LockMode::None {
            return Ok(rows.into_iter().skip(offset).take(limit).collect());
        }

        let wanted = offset.saturating_add(limit);
        let mut locked = Vec::new();
        for candidate in rows {
            if locked.len() >= wanted {
                break;
            }
            self.lock(table, candidate.id)?;
            // A concurrent commit may have changed or removed it while we waited.
            match self.visible_row(table, candidate.id) {
                Some(current) if matches(criteria, &current.doc) => locked.push(current),
                _ => {}
            }
        }
        Ok(locked.into_iter().skip(offset).collect())
    }

    fn execute_named(
        &mut self,
        table: &str,
        meta: &UpdateOperationMeta,
    ) -> Result<usize, ShardError> {
        let query = self
            .named_updates
            .read()
            .get(&meta.query_name)
            .cloned()
            .ok_or_else(|| ShardError::UnknownQuery(meta.query_name.clone()))?;
        if query.table != table {
            return Err(ShardError::validation(format!(
                "named update {} targets {}, not {}",
                meta.query_name, query.table, table
            )));
        }

        let param = |column: &String| {
            meta.params.get(column).cloned().ok_or_else(|| {
                ShardError::validation(format!(
                    "named update {} is missing parameter {}",
                    meta.query_name, column
                ))
            })
        };
        let mut criteria = Criteria::new();
        for column in &query.filter_columns {
            criteria = criteria.eq(column.clone(), param(column)?);
        }
        let assignments = query
            .set_columns
            .iter()
            .map(|column| Ok((column.clone(), param(column)?)))
            .collect::<Result<Vec<(String, Value)>, ShardError>>()?;

        let current = self.select(table, &criteria, 0, usize::MAX, LockMode::Exclusive)?;
        let affected = current.len();
        for row in current {
            let mut doc = row.doc;
            if let Some(object) = doc.as_object_mut() {
                for (column, value) in &assignments {
                    object.insert(column.clone(), value.clone());
                }
            }
            self.stage_update(table, row.id, doc);
        }
        Ok(affected)
    }

    fn commit(mut self: Box<Self>) -> Result<(), ShardError> {
        let data = Arc::clone(&self.data);
        let mut tables = data.tables.write();
        if let Some((table, key)) = self.commit_conflict(&tables) {
            drop(tables);
            UNIQUENESS_CONFLICTS.inc();
            self.release();
            return Err(ShardError::UniquenessConflict {
                table,
                key,
                shard: self.shard,
            });
        }

        let writes = std::mem::take(&mut self.writes);
        let applied = writes.len();
        for ((table, id), write) in writes {
            let t = tables.entry(table).or_default();
            match write {
                StagedWrite::Insert { key, doc } => {
                    if let Some(key) = &key {
                        t.keys.insert(key.clone(), id);
                    }
                    t.rows.insert(id, CommittedRow { key, doc });
                }
                StagedWrite::Update(doc) => {
                    if let Some(row) = t.rows.get_mut(&id) {
                        row.doc = doc;
                    }
                }
                StagedWrite::Delete => {
                    if let Some(CommittedRow { key: Some(key), .. }) = t.rows.remove(&id) {
                        if t.keys.get(&key) == Some(&id) {
                            t.keys.remove(&key);
                        }
                    }
                }
            }
        }
        drop(tables);

        debug!(
            "[shard-dao] commit tx {} on shard {} ({} writes)",
            self.tx_id, self.shard, applied
        );
        self.release();
        Ok(())
    }

    fn rollback(mut self: Box<Self>) -> Result<(), ShardError> {
        debug!(
            "[shard-dao] rollback tx {} on shard {} ({} writes discarded)",
            self.tx_id,
            self.shard,
            self.writes.len()
        );
        self.release();
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if !self.finished {
            warn!(
                "[shard-dao] tx {} on shard {} dropped unfinished, rolling back",
                self.tx_id, self.shard
            );
            self.release();
        }
    }
}
