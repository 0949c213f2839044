//! Shard-scoped transaction helpers shared by the accessors.

use tracing::warn;

use crate::domain::{ShardError, ShardId};
use crate::ports::{ShardStore, ShardTransaction};

/// Run `work` in a fresh transaction on `shard`; commit on success, roll
/// back and re-raise on failure.
pub(crate) fn in_transaction<T, F>(
    store: &dyn ShardStore,
    shard: ShardId,
    work: F,
) -> Result<T, ShardError>
where
    F: FnOnce(&mut dyn ShardTransaction) -> Result<T, ShardError>,
{
    let mut tx = store.begin(shard)?;
    match work(tx.as_mut()) {
        Ok(value) => {
            tx.commit()?;
            Ok(value)
        }
        Err(err) => {
            rollback_after(tx, &err);
            Err(err)
        }
    }
}

/// Roll back after `cause`; a failing rollback is logged, `cause` wins.
pub(crate) fn rollback_after(tx: Box<dyn ShardTransaction>, cause: &ShardError) {
    let shard = tx.shard();
    if let Err(rollback_err) = tx.rollback() {
        warn!(
            shard,
            "[shard-dao] rollback after {} failed: {}", cause, rollback_err
        );
    }
}
