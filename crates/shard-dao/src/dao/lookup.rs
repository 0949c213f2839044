//! # Lookup Accessor
//!
//! Keyed (parent) entities: one row per shard key, stored in the shard the
//! key resolves to. Also the entry point for locked chains.

use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

use super::locked::LockedContext;
use super::transaction::{in_transaction, rollback_after};
use crate::algorithms::ShardCalculator;
use crate::domain::{
    from_document, invariant_shard_key_immutable, to_document, LockMode, LookupEntity, RowId,
    ShardError, ShardId,
};
use crate::ports::{ShardStore, ShardTransaction};

/// Accessor for keyed entities of type `P`.
pub struct LookupDao<P> {
    store: Arc<dyn ShardStore>,
    calculator: Arc<ShardCalculator>,
    _entity: PhantomData<fn() -> P>,
}

impl<P: LookupEntity> LookupDao<P> {
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

    /// Insert `entity` in its shard.
    ///
    /// A second entity with the same key fails with
    /// [`ShardError::UniquenessConflict`]; the first is left untouched.
    pub fn save(&self, entity: P) -> Result<P, ShardError> {
        let shard = self.shard_for(entity.shard_key())?;
        in_transaction(self.store.as_ref(), shard, |tx| {
            self.insert_in(tx, &entity)?;
            Ok(())
        })?;
        debug!(shard, key = entity.shard_key(), "[shard-dao] saved {}", P::TABLE);
        Ok(entity)
    }

    /// Entity stored under `key`, if any.
    pub fn get(&self, key: &str) -> Result<Option<P>, ShardError> {
        let shard = self.shard_for(key)?;
        in_transaction(self.store.as_ref(), shard, |tx| {
            tx.find_by_key(P::TABLE, key, LockMode::None)?
                .map(|row| from_document(row.doc))
                .transpose()
        })
    }

    /// Whether an entity is stored under `key`.
    pub fn exists(&self, key: &str) -> Result<bool, ShardError> {
        let shard = self.shard_for(key)?;
        in_transaction(self.store.as_ref(), shard, |tx| {
            Ok(tx.find_by_key(P::TABLE, key, LockMode::None)?.is_some())
        })
    }

    /// Lock the entity under `key`, apply `mutator` and persist the result.
    /// Returns `false` when no entity exists.
    pub fn update<F>(&self, key: &str, mutator: F) -> Result<bool, ShardError>
    where
        F: FnOnce(&mut P),
    {
        let shard = self.shard_for(key)?;
        in_transaction(self.store.as_ref(), shard, |tx| {
            let Some(row) = tx.find_by_key(P::TABLE, key, LockMode::Exclusive)? else {
                return Ok(false);
            };
            let mut entity: P = from_document(row.doc)?;
            mutator(&mut entity);
            invariant_shard_key_immutable(key, entity.shard_key())?;
            self.persist_parent(tx, row.id, &entity)?;
            Ok(true)
        })
    }

    /// Delete the entity under `key`. Returns whether it existed.
    pub fn delete(&self, key: &str) -> Result<bool, ShardError> {
        let shard = self.shard_for(key)?;
        in_transaction(self.store.as_ref(), shard, |tx| {
            match tx.find_by_key(P::TABLE, key, LockMode::Exclusive)? {
                Some(row) => tx.delete(P::TABLE, row.id),
                None => Ok(false),
            }
        })
    }

    /// Open a transaction on `key`'s shard, lock the entity and hand back a
    /// chain bound to it. Fails with [`ShardError::NotFound`] when absent.
    pub fn lock_and_get_executor(&self, key: &str) -> Result<LockedContext<'_, P>, ShardError> {
        let shard = self.shard_for(key)?;
        let mut tx = self.store.begin(shard)?;

        let locked = tx
            .find_by_key(P::TABLE, key, LockMode::Exclusive)
            .and_then(|row| {
                row.ok_or_else(|| ShardError::NotFound {
                    table: P::TABLE.to_string(),
                    key: key.to_string(),
                })
            })
            .and_then(|row| Ok((row.id, from_document::<P>(row.doc)?)));

        match locked {
            Ok((row_id, parent)) => Ok(LockedContext::new(self, tx, shard, row_id, parent)),
            Err(err) => {
                rollback_after(tx, &err);
                Err(err)
            }
        }
    }

    /// Insert `entity` and hand back a chain holding the new row in the same
    /// transaction.
    pub fn save_and_get_executor(&self, entity: P) -> Result<LockedContext<'_, P>, ShardError> {
        let shard = self.shard_for(entity.shard_key())?;
        let mut tx = self.store.begin(shard)?;

        match self.insert_in(tx.as_mut(), &entity) {
            Ok(row_id) => Ok(LockedContext::new(self, tx, shard, row_id, entity)),
            Err(err) => {
                rollback_after(tx, &err);
                Err(err)
            }
        }
    }

    fn insert_in(&self, tx: &mut dyn ShardTransaction, entity: &P) -> Result<RowId, ShardError> {
        entity.validate()?;
        let doc = to_document(entity)?;
        Ok(tx.insert(P::TABLE, Some(entity.shard_key()), doc)?.id)
    }

    pub(crate) fn persist_parent(
        &self,
        tx: &mut dyn ShardTransaction,
        row_id: RowId,
        entity: &P,
    ) -> Result<(), ShardError> {
        entity.validate()?;
        tx.update(P::TABLE, row_id, to_document(entity)?)
    }
}

pub(crate) fn check_shard_counts(
    store: &dyn ShardStore,
    calculator: &ShardCalculator,
) -> Result<(), ShardError> {
    if store.shard_count() != calculator.shard_count() {
        return Err(ShardError::InvalidConfig(format!(
            "store serves {} shards, calculator routes to {}",
            store.shard_count(),
            calculator.shard_count()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryShardStore;
    use crate::algorithms::{parse_bucket, ShardManager};
    use crate::domain::ErrorKind;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Account {
        key: String,
        name: Option<String>,
    }

    impl LookupEntity for Account {
        const TABLE: &'static str = "accounts";

        fn shard_key(&self) -> &str {
            &self.key
        }

        fn validate(&self) -> Result<(), ShardError> {
            match self.name.as_deref() {
                Some("") => Err(ShardError::validation("name must not be blank")),
                _ => Ok(()),
            }
        }
    }

    fn account(key: &str, name: &str) -> Account {
        Account {
            key: key.to_string(),
            name: Some(name.to_string()),
        }
    }

    fn dao() -> (Arc<InMemoryShardStore>, LookupDao<Account>) {
        let store = Arc::new(InMemoryShardStore::with_shards(2));
        let calculator = Arc::new(ShardCalculator::new(
            ShardManager::balanced(2).unwrap(),
            parse_bucket,
        ));
        let dao = LookupDao::new(store.clone(), calculator).unwrap();
        (store, dao)
    }

    #[test]
    fn test_new_rejects_shard_count_mismatch() {
        let store = Arc::new(InMemoryShardStore::with_shards(3));
        let calculator = Arc::new(ShardCalculator::new(
            ShardManager::balanced(2).unwrap(),
            parse_bucket,
        ));
        let err = LookupDao::<Account>::new(store, calculator).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidConfiguration);
    }

    #[test]
    fn test_save_routes_by_key() {
        let (store, dao) = dao();
        dao.save(account("0", "even")).unwrap();
        dao.save(account("3", "odd")).unwrap();

        assert_eq!(store.row_count(0, Account::TABLE).unwrap(), 1);
        assert_eq!(store.row_count(1, Account::TABLE).unwrap(), 1);
        assert_eq!(dao.get("3").unwrap().unwrap().name.as_deref(), Some("odd"));
    }

    #[test]
    fn test_get_absent_is_none() {
        let (_, dao) = dao();
        assert!(dao.get("42").unwrap().is_none());
        assert!(!dao.exists("42").unwrap());
    }

    #[test]
    fn test_malformed_key_is_invalid() {
        let (_, dao) = dao();
        let err = dao.get("abc").unwrap_err();
        assert!(matches!(err, ShardError::InvalidKey { .. }));
    }

    #[test]
    fn test_duplicate_save_keeps_first() {
        let (_, dao) = dao();
        dao.save(account("0", "first")).unwrap();
        let err = dao.save(account("0", "second")).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::UniquenessConflict);
        assert_eq!(dao.get("0").unwrap().unwrap().name.as_deref(), Some("first"));
    }

    #[test]
    fn test_validate_rejects_save() {
        let (_, dao) = dao();
        let err = dao.save(account("0", "")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(!dao.exists("0").unwrap());
    }

    #[test]
    fn test_update_and_delete() {
        let (_, dao) = dao();
        dao.save(account("1", "before")).unwrap();

        assert!(dao
            .update("1", |a| a.name = Some("after".to_string()))
            .unwrap());
        assert_eq!(dao.get("1").unwrap().unwrap().name.as_deref(), Some("after"));
        assert!(!dao.update("9", |_| {}).unwrap());

        assert!(dao.delete("1").unwrap());
        assert!(!dao.delete("1").unwrap());
        assert!(dao.get("1").unwrap().is_none());
    }

    #[test]
    fn test_update_cannot_move_key() {
        let (_, dao) = dao();
        dao.save(account("1", "a")).unwrap();
        let err = dao.update("1", |a| a.key = "3".to_string()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(dao.exists("1").unwrap());
    }

    #[test]
    fn test_lock_absent_key_is_not_found() {
        let (_, dao) = dao();
        let err = dao.lock_and_get_executor("0").err().unwrap();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
