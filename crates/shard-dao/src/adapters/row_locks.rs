//! Row lock table for one shard.
//!
//! Exclusive, re-entrant per transaction, released all at once when the
//! owning transaction ends. Waiters block on a condvar until the row is
//! released or the lock-wait timeout passes.

use parking_lot::{Condvar, Mutex};
use shard_telemetry::LOCK_WAIT_TIMEOUTS;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::domain::{RowId, ShardError};

/// Transaction identifier, unique per store.
pub(crate) type TxId = u64;

/// Lockable row: (table, id).
pub(crate) type LockSlot = (String, RowId);

#[derive(Default)]
pub(crate) struct RowLocks {
    owners: Mutex<HashMap<LockSlot, TxId>>,
    released: Condvar,
}

impl RowLocks {
    /// Take an exclusive lock on `table#id` for `tx`, waiting up to `wait`.
    pub(crate) fn acquire(
        &self,
        tx: TxId,
        table: &str,
        id: RowId,
        wait: Duration,
    ) -> Result<(), ShardError> {
        let slot: LockSlot = (table.to_string(), id);
        let started = Instant::now();
        let deadline = started + wait;

        let mut owners = self.owners.lock();
        loop {
            let holder = owners.get(&slot).copied();
            match holder {
                None => {
                    owners.insert(slot, tx);
                    return Ok(());
                }
                Some(owner) if owner == tx => return Ok(()),
                Some(owner) => {
                    if Instant::now() >= deadline {
                        LOCK_WAIT_TIMEOUTS.inc();
                        return Err(ShardError::LockTimeout {
                            table: table.to_string(),
                            id,
                            waited_ms: started.elapsed().as_millis() as u64,
                        });
                    }
                    debug!(
                        "[shard-dao] tx {} waiting on {}#{} held by tx {}",
                        tx, table, id, owner
                    );
                    self.released.wait_until(&mut owners, deadline);
                }
            }
        }
    }

    /// Release every slot in `slots` still owned by `tx` and wake waiters.
    pub(crate) fn release_all<I>(&self, tx: TxId, slots: I)
    where
        I: IntoIterator<Item = LockSlot>,
    {
        let mut owners = self.owners.lock();
        for slot in slots {
            if owners.get(&slot) == Some(&tx) {
                owners.remove(&slot);
            }
        }
        drop(owners);
        self.released.notify_all();
    }

    #[cfg(test)]
    pub(crate) fn holder(&self, table: &str, id: RowId) -> Option<TxId> {
        self.owners.lock().get(&(table.to_string(), id)).copied()
    }
}
