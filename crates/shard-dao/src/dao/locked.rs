//! # Locking Executor
//!
//! A single-use chain bound to one locked parent row and the transaction
//! holding that lock. Child operations and parent mutations are queued and
//! only run in [`LockedContext::execute`], in the order they were added,
//! all inside the one transaction on the parent's shard.
//!
//! ## Outcomes
//!
//! | Situation | Effect | State |
//! |-----------|--------|-------|
//! | `filter` vetoed | nothing queued runs, clean commit | `Executed` |
//! | every step succeeded | commit | `Executed` |
//! | any step failed | rollback, error returned | `Failed` |
//! | dropped without `execute` | rollback | - |

use shard_telemetry::{metric_inc, HistogramTimer, CHAINS_EXECUTED, CHAIN_DURATION};
use tracing::{debug, info, warn};

use super::lookup::LookupDao;
use super::relational::RelationalDao;
use super::transaction::rollback_after;
use crate::domain::{
    invariant_shard_key_immutable, Criteria, ExecutorState, LookupEntity, RelationalEntity, RowId,
    ShardError, ShardId, UpdateOperationMeta,
};
use crate::ports::ShardTransaction;

type Operation<'a, P> =
    Box<dyn FnOnce(&mut dyn ShardTransaction, &P) -> Result<(), ShardError> + 'a>;

type ParentMutator<'a, P> = Box<dyn FnOnce(&mut P) + 'a>;

/// Locked parent plus queued work. Consumed by [`execute`](Self::execute).
#[must_use = "a locked context rolls back unless executed"]
pub struct LockedContext<'a, P: LookupEntity> {
    dao: &'a LookupDao<P>,
    tx: Option<Box<dyn ShardTransaction>>,
    shard: ShardId,
    row_id: RowId,
    parent: P,
    permit: bool,
    operations: Vec<(&'static str, Operation<'a, P>)>,
    mutators: Vec<ParentMutator<'a, P>>,
    state: ExecutorState,
    _timer: HistogramTimer,
}

impl<'a, P: LookupEntity> LockedContext<'a, P> {
    pub(crate) fn new(
        dao: &'a LookupDao<P>,
        tx: Box<dyn ShardTransaction>,
        shard: ShardId,
        row_id: RowId,
        parent: P,
    ) -> Self {
        debug!(
            shard,
            key = parent.shard_key(),
            "[shard-dao] locked {} for chain",
            P::TABLE
        );
        Self {
            dao,
            tx: Some(tx),
            shard,
            row_id,
            parent,
            permit: true,
            operations: Vec::new(),
            mutators: Vec::new(),
            state: ExecutorState::Open,
            _timer: HistogramTimer::new(&CHAIN_DURATION),
        }
    }

    /// Locked parent as read (mutations apply only at execute).
    pub fn parent(&self) -> &P {
        &self.parent
    }

    /// Shard the chain runs on.
    pub fn shard(&self) -> ShardId {
        self.shard
    }

    /// Current state.
    pub fn state(&self) -> ExecutorState {
        self.state
    }

    /// Gate the chain on `predicate(parent)`. A `false` skips all queued
    /// work at execute time; several filters must all pass.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: FnOnce(&P) -> bool,
    {
        self.permit = self.permit && predicate(&self.parent);
        self
    }

    fn enqueue<F>(mut self, label: &'static str, operation: F) -> Self
    where
        F: FnOnce(&mut dyn ShardTransaction, &P) -> Result<(), ShardError> + 'a,
    {
        debug!(
            shard = self.shard,
            position = self.operations.len(),
            "[shard-dao] queued {}",
            label
        );
        self.operations.push((label, Box::new(operation)));
        self
    }

    /// Queue an insert of the child `producer` builds from the parent.
    pub fn save<C, F>(self, dao: &'a RelationalDao<C>, producer: F) -> Self
    where
        C: RelationalEntity,
        F: FnOnce(&P) -> Result<C, ShardError> + 'a,
    {
        self.enqueue("save", move |tx, parent| {
            dao.save_in(tx, producer(parent)?).map(drop)
        })
    }

    /// Queue inserts of every child `producer` builds from the parent.
    pub fn save_all<C, F>(self, dao: &'a RelationalDao<C>, producer: F) -> Self
    where
        C: RelationalEntity,
        F: FnOnce(&P) -> Result<Vec<C>, ShardError> + 'a,
    {
        self.enqueue("save_all", move |tx, parent| {
            dao.save_all_in(tx, producer(parent)?).map(drop)
        })
    }

    /// Queue a mutation of child row `id`. A missing row fails the chain.
    pub fn update<C, F>(self, dao: &'a RelationalDao<C>, id: RowId, mutator: F) -> Self
    where
        C: RelationalEntity,
        F: FnOnce(C) -> C + 'a,
    {
        self.enqueue("update", move |tx, _| {
            if dao.update_in(tx, id, mutator)? {
                Ok(())
            } else {
                Err(ShardError::NotFound {
                    table: C::TABLE.to_string(),
                    key: format!("id {id}"),
                })
            }
        })
    }

    /// Queue a mutation of an already loaded child. A missing row fails the
    /// chain.
    pub fn update_entity<C, F>(self, dao: &'a RelationalDao<C>, entity: C, mutator: F) -> Self
    where
        C: RelationalEntity,
        F: FnOnce(C) -> C + 'a,
    {
        self.enqueue("update_entity", move |tx, _| {
            let id = entity.id();
            if dao.update_entity_in(tx, entity, mutator)? {
                Ok(())
            } else {
                Err(ShardError::NotFound {
                    table: C::TABLE.to_string(),
                    key: format!("id {}", id.unwrap_or_default()),
                })
            }
        })
    }

    /// Queue a scroll update over children matching `criteria`;
    /// `keep_going` is asked after every row.
    pub fn update_matching<C, F, K>(
        self,
        dao: &'a RelationalDao<C>,
        criteria: &'a Criteria,
        mutator: F,
        keep_going: K,
    ) -> Self
    where
        C: RelationalEntity,
        F: FnMut(C) -> C + 'a,
        K: FnMut() -> bool + 'a,
    {
        self.enqueue("update_matching", move |tx, _| {
            dao.update_matching_in(tx, criteria, mutator, keep_going)
                .map(drop)
        })
    }

    /// Queue a create-or-update: mutate the first child matching
    /// `criteria`, or insert what `creator` builds from the parent's key.
    pub fn create_or_update<C, F, G>(
        self,
        dao: &'a RelationalDao<C>,
        criteria: &'a Criteria,
        mutator: F,
        creator: G,
    ) -> Self
    where
        C: RelationalEntity,
        F: FnOnce(C) -> C + 'a,
        G: FnOnce(&str) -> Result<C, ShardError> + 'a,
    {
        self.enqueue("create_or_update", move |tx, parent| {
            dao.create_or_update_in(tx, parent.shard_key(), criteria, mutator, creator)
                .map(drop)
        })
    }

    /// Queue a named bulk update against the children's table.
    pub fn update_using_query<C>(
        self,
        dao: &'a RelationalDao<C>,
        meta: UpdateOperationMeta,
    ) -> Self
    where
        C: RelationalEntity,
    {
        self.enqueue("update_using_query", move |tx, _| {
            dao.update_using_query_in(tx, &meta).map(drop)
        })
    }

    /// Queue a mutation of the parent, applied after all child operations.
    /// The parent's shard key must not change.
    pub fn mutate<F>(mut self, mutator: F) -> Self
    where
        F: FnOnce(&mut P) + 'a,
    {
        self.mutators.push(Box::new(mutator));
        self
    }

    fn transition(&mut self, next: ExecutorState) -> Result<(), ShardError> {
        if !self.state.can_transition_to(next) {
            return Err(ShardError::InvalidTransition {
                from: format!("{:?}", self.state),
                to: format!("{:?}", next),
            });
        }
        self.state = next;
        Ok(())
    }

    /// Run the chain and end the transaction. Returns the parent as
    /// persisted. On error nothing the chain did is visible.
    pub fn execute(mut self) -> Result<P, ShardError> {
        let Some(mut tx) = self.tx.take() else {
            return Err(ShardError::InvalidTransition {
                from: format!("{:?}", self.state),
                to: format!("{:?}", ExecutorState::Executed),
            });
        };

        if !self.permit {
            debug!(
                shard = self.shard,
                skipped = self.operations.len(),
                "[shard-dao] chain vetoed by filter"
            );
            self.operations.clear();
            self.mutators.clear();
            return self.finish(tx.commit(), "vetoed").map(|_| self.parent.clone());
        }

        match self.run(tx.as_mut()) {
            Ok(parent) => {
                let committed = self.finish(tx.commit(), "committed");
                committed.map(|_| parent)
            }
            Err(err) => {
                rollback_after(tx, &err);
                self.fail(&err);
                Err(err)
            }
        }
    }

    fn run(&mut self, tx: &mut dyn ShardTransaction) -> Result<P, ShardError> {
        for (position, (label, operation)) in self.operations.drain(..).enumerate() {
            operation(&mut *tx, &self.parent).map_err(|err| {
                warn!(
                    shard = self.shard,
                    position,
                    "[shard-dao] {} failed: {}", label, err
                );
                err
            })?;
        }

        if self.mutators.is_empty() {
            return Ok(self.parent.clone());
        }
        let mut parent = self.parent.clone();
        for mutator in self.mutators.drain(..) {
            mutator(&mut parent);
        }
        invariant_shard_key_immutable(self.parent.shard_key(), parent.shard_key())?;
        self.dao.persist_parent(tx, self.row_id, &parent)?;
        Ok(parent)
    }

    fn finish(&mut self, commit: Result<(), ShardError>, outcome: &str) -> Result<(), ShardError> {
        match commit {
            Ok(()) => {
                self.transition(ExecutorState::Executed)?;
                metric_inc!(CHAINS_EXECUTED, &[outcome]);
                info!(
                    shard = self.shard,
                    key = self.parent.shard_key(),
                    "[shard-dao] chain {}",
                    outcome
                );
                Ok(())
            }
            Err(err) => {
                self.fail(&err);
                Err(err)
            }
        }
    }

    fn fail(&mut self, err: &ShardError) {
        if self.transition(ExecutorState::Failed).is_ok() {
            metric_inc!(CHAINS_EXECUTED, &["rolled_back"]);
        }
        warn!(
            shard = self.shard,
            key = self.parent.shard_key(),
            "[shard-dao] chain rolled back: {}",
            err
        );
    }
}

impl<P: LookupEntity> Drop for LockedContext<'_, P> {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            warn!(
                shard = self.shard,
                key = self.parent.shard_key(),
                "[shard-dao] chain dropped without execute, rolling back"
            );
            if let Err(err) = tx.rollback() {
                warn!(shard = self.shard, "[shard-dao] rollback failed: {}", err);
            }
            metric_inc!(CHAINS_EXECUTED, &["rolled_back"]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryShardStore;
    use crate::algorithms::{parse_bucket, ShardCalculator, ShardManager};
    use crate::domain::ErrorKind;
    use serde::{Deserialize, Serialize};
    use std::sync::Arc;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Owner {
        key: String,
        label: String,
    }

    impl LookupEntity for Owner {
        const TABLE: &'static str = "owners";

        fn shard_key(&self) -> &str {
            &self.key
        }
    }

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Item {
        #[serde(default)]
        id: Option<RowId>,
        owner: String,
    }

    impl RelationalEntity for Item {
        const TABLE: &'static str = "items";

        fn shard_key(&self) -> &str {
            &self.owner
        }

        fn id(&self) -> Option<RowId> {
            self.id
        }
    }

    fn daos() -> (LookupDao<Owner>, RelationalDao<Item>) {
        let store = Arc::new(InMemoryShardStore::with_shards(2));
        let calculator = Arc::new(ShardCalculator::new(
            ShardManager::balanced(2).unwrap(),
            parse_bucket,
        ));
        (
            LookupDao::new(store.clone(), calculator.clone()).unwrap(),
            RelationalDao::new(store, calculator).unwrap(),
        )
    }

    fn owner(key: &str) -> Owner {
        Owner {
            key: key.to_string(),
            label: "start".to_string(),
        }
    }

    #[test]
    fn test_context_exposes_binding() {
        let (owners, _) = daos();
        let context = owners.save_and_get_executor(owner("3")).unwrap();
        assert_eq!(context.shard(), 1);
        assert_eq!(context.state(), ExecutorState::Open);
        assert_eq!(context.parent().key, "3");
        context.execute().unwrap();
    }

    #[test]
    fn test_multiple_filters_all_must_pass() {
        let (owners, items) = daos();
        owners.save(owner("0")).unwrap();

        owners
            .lock_and_get_executor("0")
            .unwrap()
            .filter(|_| true)
            .filter(|_| false)
            .save(&items, |p| Ok(Item { id: None, owner: p.key.clone() }))
            .execute()
            .unwrap();

        assert!(items.get("0", 1).unwrap().is_none());
    }

    #[test]
    fn test_mutating_shard_key_fails() {
        let (owners, _) = daos();
        owners.save(owner("0")).unwrap();

        let err = owners
            .lock_and_get_executor("0")
            .unwrap()
            .mutate(|p| p.key = "2".to_string())
            .execute()
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(owners.exists("0").unwrap());
        assert!(!owners.exists("2").unwrap());
    }

    #[test]
    fn test_child_on_other_shard_fails() {
        let (owners, items) = daos();
        owners.save(owner("0")).unwrap();

        let err = owners
            .lock_and_get_executor("0")
            .unwrap()
            .save(&items, |_| Ok(Item { id: None, owner: "1".to_string() }))
            .execute()
            .unwrap_err();

        assert!(matches!(err, ShardError::ShardMismatch { expected: 0, actual: 1 }));
    }

    #[test]
    fn test_update_missing_child_fails() {
        let (owners, items) = daos();
        owners.save(owner("0")).unwrap();

        let err = owners
            .lock_and_get_executor("0")
            .unwrap()
            .update(&items, 42, |item| item)
            .mutate(|p| p.label = "touched".to_string())
            .execute()
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(owners.get("0").unwrap().unwrap().label, "start");
    }

    #[test]
    fn test_drop_without_execute_rolls_back() {
        let (owners, _) = daos();
        {
            let _context = owners.save_and_get_executor(owner("0")).unwrap();
        }
        assert!(!owners.exists("0").unwrap());

        // The lock was released with the rollback.
        owners.save(owner("0")).unwrap();
        owners
            .lock_and_get_executor("0")
            .unwrap()
            .mutate(|p| p.label = "again".to_string())
            .execute()
            .unwrap();
        assert_eq!(owners.get("0").unwrap().unwrap().label, "again");
    }

    #[test]
    fn test_execute_returns_persisted_parent() {
        let (owners, _) = daos();
        owners.save(owner("0")).unwrap();
        let parent = owners
            .lock_and_get_executor("0")
            .unwrap()
            .mutate(|p| p.label.push_str("-1"))
            .mutate(|p| p.label.push_str("-2"))
            .execute()
            .unwrap();
        assert_eq!(parent.label, "start-1-2");
        assert_eq!(owners.get("0").unwrap().unwrap(), parent);
    }
}
