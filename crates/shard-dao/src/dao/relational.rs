//! # Relational Accessor
//!
//! Dependent (child) entities. Every call names the owning shard key and
//! runs only on the shard that key resolves to. Each public method runs in
//! its own transaction; the `*_in` variants run inside a caller's
//! transaction and are what the locking executor enqueues.

use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

use super::lookup::check_shard_counts;
use super::transaction::in_transaction;
use crate::algorithms::ShardCalculator;
use crate::domain::{
    from_document, invariant_single_shard, to_document, Criteria, LockMode, RelationalEntity,
    RowId, ShardError, ShardId, UpdateOperationMeta,
};
use crate::ports::{ShardStore, ShardTransaction};

/// Accessor for dependent entities of type `C`.
pub struct RelationalDao<C> {
    store: Arc<dyn ShardStore>,
    calculator: Arc<ShardCalculator>,
    _entity: PhantomData<fn() -> C>,
}

impl<C: RelationalEntity> RelationalDao<C> {
    /// Bind an accessor to a store. The store must serve exactly the
    /// calculator's shard count.
    pub fn new(
        store: Arc<dyn ShardStore>,
        calculator: Arc<ShardCalculator>,
    ) -> Result<Self, ShardError> {
        check_shard_counts(store.as_ref(), &calculator)?;
        Ok(Self {
            store,
            calculator,
            _entity: PhantomData,
        })
    }

    /// Shard owning `key`.
    pub fn shard_for(&self, key: &str) -> Result<ShardId, ShardError> {
        self.calculator.shard_index_for(key)
    }

    fn run<T, F>(&self, key: &str, work: F) -> Result<T, ShardError>
    where
        F: FnOnce(&mut dyn ShardTransaction) -> Result<T, ShardError>,
    {
        let shard = self.shard_for(key)?;
        in_transaction(self.store.as_ref(), shard, work)
    }

    /// Insert `entity` under `key`; returns it with its assigned id.
    pub fn save(&self, key: &str, entity: C) -> Result<C, ShardError> {
        self.run(key, |tx| self.save_in(tx, entity))
    }

    /// Insert all of `entities` under `key`, all or nothing.
    pub fn save_all(&self, key: &str, entities: Vec<C>) -> Result<Vec<C>, ShardError> {
        self.run(key, |tx| self.save_all_in(tx, entities))
    }

    /// Row `id` under `key`, if any.
    pub fn get(&self, key: &str, id: RowId) -> Result<Option<C>, ShardError> {
        self.run(key, |tx| {
            tx.get(C::TABLE, id, LockMode::None)?
                .map(|row| from_document(row.doc))
                .transpose()
        })
    }

    /// Up to `limit` rows matching `criteria`, skipping `offset`.
    pub fn select(
        &self,
        key: &str,
        criteria: &Criteria,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<C>, ShardError> {
        self.run(key, |tx| {
            tx.select(C::TABLE, criteria, offset, limit, LockMode::None)?
                .into_iter()
                .map(|row| from_document(row.doc))
                .collect()
        })
    }

    /// Lock row `id`, apply `mutator`, persist. Returns `false` if absent.
    pub fn update<F>(&self, key: &str, id: RowId, mutator: F) -> Result<bool, ShardError>
    where
        F: FnOnce(C) -> C,
    {
        self.run(key, |tx| self.update_in(tx, id, mutator))
    }

    /// Apply `mutator` to `entity` and persist it over its stored row.
    /// Returns `false` if the row no longer exists.
    pub fn update_entity<F>(&self, key: &str, entity: C, mutator: F) -> Result<bool, ShardError>
    where
        F: FnOnce(C) -> C,
    {
        self.run(key, |tx| self.update_entity_in(tx, entity, mutator))
    }

    /// Scroll rows matching `criteria` in order, mutating and persisting
    /// each; `keep_going` is asked after every row. Returns rows updated.
    pub fn update_matching<F, K>(
        &self,
        key: &str,
        criteria: &Criteria,
        mutator: F,
        keep_going: K,
    ) -> Result<usize, ShardError>
    where
        F: FnMut(C) -> C,
        K: FnMut() -> bool,
    {
        self.run(key, |tx| {
            self.update_matching_in(tx, criteria, mutator, keep_going)
        })
    }

    /// Mutate the first row matching `criteria`, or insert what `creator`
    /// builds for `key` when nothing matches. Exactly one of the two runs.
    pub fn create_or_update<F, G>(
        &self,
        key: &str,
        criteria: &Criteria,
        mutator: F,
        creator: G,
    ) -> Result<C, ShardError>
    where
        F: FnOnce(C) -> C,
        G: FnOnce(&str) -> Result<C, ShardError>,
    {
        self.run(key, |tx| {
            self.create_or_update_in(tx, key, criteria, mutator, creator)
        })
    }

    /// Run a registered named update on `key`'s shard. Returns rows affected.
    pub fn update_using_query(
        &self,
        key: &str,
        meta: &UpdateOperationMeta,
    ) -> Result<usize, ShardError> {
        self.run(key, |tx| self.update_using_query_in(tx, meta))
    }

    /// Every row this accessor touches must live on the transaction's shard.
    fn ensure_same_shard(&self, tx: &dyn ShardTransaction, entity: &C) -> Result<(), ShardError> {
        let actual = self.shard_for(entity.shard_key())?;
        invariant_single_shard(tx.shard(), actual)
    }

    fn persist_in(
        &self,
        tx: &mut dyn ShardTransaction,
        id: RowId,
        entity: &C,
    ) -> Result<(), ShardError> {
        self.ensure_same_shard(tx, entity)?;
        entity.validate()?;
        tx.update(C::TABLE, id, to_document(entity)?)
    }

    pub(crate) fn save_in(&self, tx: &mut dyn ShardTransaction, entity: C) -> Result<C, ShardError> {
        self.ensure_same_shard(tx, &entity)?;
        entity.validate()?;
        let row = tx.insert(C::TABLE, None, to_document(&entity)?)?;
        debug!(
            shard = tx.shard(),
            id = row.id,
            "[shard-dao] inserted {}",
            C::TABLE
        );
        from_document(row.doc)
    }

    pub(crate) fn save_all_in(
        &self,
        tx: &mut dyn ShardTransaction,
        entities: Vec<C>,
    ) -> Result<Vec<C>, ShardError> {
        entities
            .into_iter()
            .map(|entity| self.save_in(tx, entity))
            .collect()
    }

    pub(crate) fn update_in<F>(
        &self,
        tx: &mut dyn ShardTransaction,
        id: RowId,
        mutator: F,
    ) -> Result<bool, ShardError>
    where
        F: FnOnce(C) -> C,
    {
        let Some(row) = tx.get(C::TABLE, id, LockMode::Exclusive)? else {
            return Ok(false);
        };
        let updated = mutator(from_document(row.doc)?);
        self.persist_in(tx, id, &updated)?;
        Ok(true)
    }

    pub(crate) fn update_entity_in<F>(
        &self,
        tx: &mut dyn ShardTransaction,
        entity: C,
        mutator: F,
    ) -> Result<bool, ShardError>
    where
        F: FnOnce(C) -> C,
    {
        let id = entity
            .id()
            .ok_or_else(|| ShardError::validation(format!("{} entity has no id", C::TABLE)))?;
        if tx.get(C::TABLE, id, LockMode::Exclusive)?.is_none() {
            return Ok(false);
        }
        let updated = mutator(entity);
        self.persist_in(tx, id, &updated)?;
        Ok(true)
    }

    pub(crate) fn update_matching_in<F, K>(
        &self,
        tx: &mut dyn ShardTransaction,
        criteria: &Criteria,
        mut mutator: F,
        mut keep_going: K,
    ) -> Result<usize, ShardError>
    where
        F: FnMut(C) -> C,
        K: FnMut() -> bool,
    {
        let matched = tx.select(C::TABLE, criteria, 0, usize::MAX, LockMode::Exclusive)?;
        let mut updated = 0;
        for row in matched {
            let entity = mutator(from_document(row.doc)?);
            self.persist_in(tx, row.id, &entity)?;
            updated += 1;
            if !keep_going() {
                break;
            }
        }
        debug!(
            shard = tx.shard(),
            updated,
            "[shard-dao] scroll update on {}",
            C::TABLE
        );
        Ok(updated)
    }

    pub(crate) fn create_or_update_in<F, G>(
        &self,
        tx: &mut dyn ShardTransaction,
        key: &str,
        criteria: &Criteria,
        mutator: F,
        creator: G,
    ) -> Result<C, ShardError>
    where
        F: FnOnce(C) -> C,
        G: FnOnce(&str) -> Result<C, ShardError>,
    {
        let existing = tx
            .select(C::TABLE, criteria, 0, 1, LockMode::Exclusive)?
            .into_iter()
            .next();
        match existing {
            Some(row) => {
                let updated = mutator(from_document(row.doc)?);
                self.persist_in(tx, row.id, &updated)?;
                Ok(updated)
            }
            None => self.save_in(tx, creator(key)?),
        }
    }

    pub(crate) fn update_using_query_in(
        &self,
        tx: &mut dyn ShardTransaction,
        meta: &UpdateOperationMeta,
    ) -> Result<usize, ShardError> {
        let affected = tx.execute_named(C::TABLE, meta)?;
        debug!(
            shard = tx.shard(),
            affected,
            "[shard-dao] named update {} on {}",
            meta.query_name,
            C::TABLE
        );
        Ok(affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryShardStore;
    use crate::algorithms::{parse_bucket, ShardManager};
    use crate::domain::{ErrorKind, NamedUpdate};
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use std::cell::Cell;
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Note {
        #[serde(default)]
        id: Option<RowId>,
        owner: String,
        text: String,
    }

    impl RelationalEntity for Note {
        const TABLE: &'static str = "notes";

        fn shard_key(&self) -> &str {
            &self.owner
        }

        fn id(&self) -> Option<RowId> {
            self.id
        }
    }

    fn note(owner: &str, text: &str) -> Note {
        Note {
            id: None,
            owner: owner.to_string(),
            text: text.to_string(),
        }
    }

    fn dao() -> (Arc<InMemoryShardStore>, RelationalDao<Note>) {
        let store = Arc::new(InMemoryShardStore::with_shards(2));
        let calculator = Arc::new(ShardCalculator::new(
            ShardManager::balanced(2).unwrap(),
            parse_bucket,
        ));
        let dao = RelationalDao::new(store.clone(), calculator).unwrap();
        (store, dao)
    }

    #[test]
    fn test_save_assigns_id() {
        let (_, dao) = dao();
        let saved = dao.save("0", note("0", "a")).unwrap();
        assert_eq!(saved.id, Some(1));
        assert_eq!(dao.get("0", 1).unwrap().unwrap().text, "a");
        assert!(dao.get("0", 2).unwrap().is_none());
    }

    #[test]
    fn test_save_rejects_foreign_shard() {
        let (store, dao) = dao();
        let err = dao.save("0", note("1", "a")).unwrap_err();
        assert!(matches!(
            err,
            ShardError::ShardMismatch {
                expected: 0,
                actual: 1
            }
        ));
        assert_eq!(store.row_count(0, Note::TABLE).unwrap(), 0);
    }

    #[test]
    fn test_save_all_is_atomic() {
        let (store, dao) = dao();
        let err = dao
            .save_all("0", vec![note("0", "a"), note("1", "b")])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(store.row_count(0, Note::TABLE).unwrap(), 0);

        let saved = dao
            .save_all("0", vec![note("0", "a"), note("2", "b")])
            .unwrap();
        assert_eq!(saved.len(), 2);
    }

    #[test]
    fn test_select_window() {
        let (_, dao) = dao();
        for text in ["a", "b", "c"] {
            dao.save("0", note("0", text)).unwrap();
        }
        let page = dao
            .select("0", &Criteria::new().order_desc("id"), 1, 1)
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].text, "b");
    }

    #[test]
    fn test_update_by_id_and_entity() {
        let (_, dao) = dao();
        let saved = dao.save("0", note("0", "a")).unwrap();

        assert!(dao
            .update("0", 1, |mut n| {
                n.text = "b".to_string();
                n
            })
            .unwrap());
        assert!(!dao.update("0", 9, |n| n).unwrap());

        assert!(dao
            .update_entity("0", saved, |mut n| {
                n.text = "c".to_string();
                n
            })
            .unwrap());
        assert_eq!(dao.get("0", 1).unwrap().unwrap().text, "c");

        let err = dao.update_entity("0", note("0", "x"), |n| n).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_update_matching_stops_when_told() {
        let (_, dao) = dao();
        for text in ["a", "b", "c"] {
            dao.save("0", note("0", text)).unwrap();
        }
        let criteria = Criteria::new().eq("owner", "0").order_asc("id");
        let updated = dao
            .update_matching(
                "0",
                &criteria,
                |mut n| {
                    n.text.push('!');
                    n
                },
                || false,
            )
            .unwrap();

        assert_eq!(updated, 1);
        let texts: Vec<String> = dao
            .select("0", &criteria, 0, 10)
            .unwrap()
            .into_iter()
            .map(|n| n.text)
            .collect();
        assert_eq!(texts, vec!["a!", "b", "c"]);
    }

    #[test]
    fn test_create_or_update() {
        let (_, dao) = dao();
        let criteria = Criteria::new().eq("text", "a");

        let created = dao
            .create_or_update("0", &criteria, |_| unreachable!(), |key| Ok(note(key, "a")))
            .unwrap();
        assert_eq!(created.id, Some(1));

        let updated = dao
            .create_or_update(
                "0",
                &criteria,
                |mut n| {
                    n.text = "a2".to_string();
                    n
                },
                |_| unreachable!(),
            )
            .unwrap();
        assert_eq!(updated.id, Some(1));
        assert_eq!(updated.text, "a2");
    }

    #[test]
    fn test_update_using_query() {
        let (store, dao) = dao();
        store
            .register_named_update(
                "retext",
                NamedUpdate::new(Note::TABLE).filter_on("owner").set("text"),
            )
            .unwrap();
        dao.save("0", note("0", "a")).unwrap();
        dao.save("0", note("0", "b")).unwrap();

        let meta = UpdateOperationMeta::new("retext")
            .param("owner", "0")
            .param("text", "z");
        assert_eq!(dao.update_using_query("0", &meta).unwrap(), 2);
        assert_eq!(dao.get("0", 2).unwrap().unwrap().text, "z");
    }

    /// Locks note 1 on shard 0, rewrites it to `done`, lets `contender` run
    /// while the lock is held, then commits.
    fn with_concurrent_rewrite<T>(store: &InMemoryShardStore, contender: impl FnOnce() -> T) -> T {
        let locked = Barrier::new(2);
        thread::scope(|scope| {
            scope.spawn(|| {
                let mut tx = store.begin(0).unwrap();
                tx.get(Note::TABLE, 1, LockMode::Exclusive).unwrap();
                tx.update(Note::TABLE, 1, json!({ "owner": "0", "text": "done" }))
                    .unwrap();
                locked.wait();
                thread::sleep(Duration::from_millis(100));
                tx.commit().unwrap();
            });
            locked.wait();
            contender()
        })
    }

    #[test]
    fn test_update_matching_skips_rows_changed_while_waiting() {
        let (store, dao) = dao();
        dao.save("0", note("0", "pending")).unwrap();
        let pending = Criteria::new().eq("text", "pending");

        let updated = with_concurrent_rewrite(&store, || {
            dao.update_matching(
                "0",
                &pending,
                |mut n| {
                    n.text = "retried".to_string();
                    n
                },
                || true,
            )
            .unwrap()
        });

        assert_eq!(updated, 0);
        assert_eq!(dao.get("0", 1).unwrap().unwrap().text, "done");
    }

    #[test]
    fn test_create_or_update_creates_when_match_changed_while_waiting() {
        let (store, dao) = dao();
        dao.save("0", note("0", "pending")).unwrap();
        let pending = Criteria::new().eq("text", "pending");
        let created = Cell::new(0);

        let result = with_concurrent_rewrite(&store, || {
            dao.create_or_update(
                "0",
                &pending,
                |_| panic!("mutated a row that no longer matches"),
                |key| {
                    created.set(created.get() + 1);
                    Ok(note(key, "pending"))
                },
            )
            .unwrap()
        });

        assert_eq!(created.get(), 1);
        assert_eq!(result.id, Some(2));
        assert_eq!(dao.get("0", 1).unwrap().unwrap().text, "done");
    }
}
