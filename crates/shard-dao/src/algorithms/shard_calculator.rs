//! # Shard Calculator
//!
//! The only place a business key becomes a shard index:
//! `manager.shard_for_bucket(bucket_fn(key))`.

use std::fmt;

use crate::domain::{BucketId, ShardError, ShardId};

use super::shard_manager::ShardManager;

type BucketFn = dyn Fn(&str) -> Result<BucketId, ShardError> + Send + Sync;

/// Shard manager plus key-to-bucket function. Immutable after construction.
pub struct ShardCalculator {
    manager: ShardManager,
    bucket_fn: Box<BucketFn>,
}

impl ShardCalculator {
    /// Compose a manager with a pure key-to-bucket function.
    pub fn new<F>(manager: ShardManager, bucket_fn: F) -> Self
    where
        F: Fn(&str) -> Result<BucketId, ShardError> + Send + Sync + 'static,
    {
        Self {
            manager,
            bucket_fn: Box::new(bucket_fn),
        }
    }

    /// Shard owning `key`.
    pub fn shard_index_for(&self, key: &str) -> Result<ShardId, ShardError> {
        let bucket = (self.bucket_fn)(key)?;
        Ok(self.manager.shard_for_bucket(bucket))
    }

    /// Underlying manager.
    pub fn manager(&self) -> &ShardManager {
        &self.manager
    }

    /// Number of shards.
    pub fn shard_count(&self) -> u16 {
        self.manager.shard_count()
    }
}

impl fmt::Debug for ShardCalculator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardCalculator")
            .field("manager", &self.manager)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::{hashed_bucket, parse_bucket};
    use std::sync::Arc;

    #[test]
    fn test_integer_keys_balanced() {
        let calc = ShardCalculator::new(ShardManager::balanced(2).unwrap(), parse_bucket);
        assert_eq!(calc.shard_index_for("0").unwrap(), 0);
        assert_eq!(calc.shard_index_for("1").unwrap(), 1);
        assert_eq!(calc.shard_index_for("10").unwrap(), 0);
    }

    #[test]
    fn test_integer_keys_legacy() {
        let calc = ShardCalculator::new(ShardManager::legacy(32).unwrap(), parse_bucket);
        assert_eq!(calc.shard_index_for("999").unwrap(), 31);
    }

    #[test]
    fn test_malformed_key_propagates() {
        let calc = ShardCalculator::new(ShardManager::balanced(2).unwrap(), parse_bucket);
        assert!(matches!(
            calc.shard_index_for("tenant"),
            Err(ShardError::InvalidKey { .. })
        ));
    }

    #[test]
    fn test_hashed_keys_in_range() {
        let calc = ShardCalculator::new(ShardManager::balanced(7).unwrap(), hashed_bucket);
        for i in 0..100 {
            let shard = calc.shard_index_for(&format!("tenant-{i}")).unwrap();
            assert!(shard < 7);
        }
    }

    #[test]
    fn test_shared_across_threads() {
        let calc = Arc::new(ShardCalculator::new(
            ShardManager::balanced(4).unwrap(),
            parse_bucket,
        ));
        let expected = calc.shard_index_for("13").unwrap();

        std::thread::scope(|scope| {
            for _ in 0..4 {
                let calc = Arc::clone(&calc);
                scope.spawn(move || {
                    for _ in 0..100 {
                        assert_eq!(calc.shard_index_for("13").unwrap(), expected);
                    }
                });
            }
        });
    }
}
