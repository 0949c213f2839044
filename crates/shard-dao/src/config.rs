//! Sharding configuration.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::algorithms::ShardManager;
use crate::domain::{ShardError, ShardStrategy};

/// Shard layout and lock policy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShardingConfig {
    /// Number of shards.
    pub shard_count: u16,
    /// Bucket-to-shard strategy.
    pub strategy: ShardStrategy,
    /// How long a row lock wait may block, in milliseconds.
    pub lock_wait_timeout_ms: u64,
}

impl Default for ShardingConfig {
    fn default() -> Self {
        Self {
            shard_count: 2,
            strategy: ShardStrategy::Balanced,
            lock_wait_timeout_ms: 5_000,
        }
    }
}

impl ShardingConfig {
    /// Create config for testing.
    pub fn for_testing() -> Self {
        Self {
            shard_count: 2,
            strategy: ShardStrategy::Balanced,
            lock_wait_timeout_ms: 250,
        }
    }

    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `SHARD_COUNT`: Number of shards (default: 2)
    /// - `SHARD_STRATEGY`: `balanced` or `legacy` (default: balanced)
    /// - `SHARD_LOCK_WAIT_MS`: Lock wait timeout (default: 5000)
    ///
    /// Absent or unparseable values fall back to the default.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            shard_count: env::var("SHARD_COUNT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.shard_count),

            strategy: env::var("SHARD_STRATEGY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.strategy),

            lock_wait_timeout_ms: env::var("SHARD_LOCK_WAIT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.lock_wait_timeout_ms),
        }
    }

    /// Reject layouts no manager can serve.
    pub fn validate(&self) -> Result<(), ShardError> {
        self.build_manager().map(|_| ())
    }

    /// Manager for this layout.
    pub fn build_manager(&self) -> Result<ShardManager, ShardError> {
        ShardManager::from_strategy(self.strategy, self.shard_count)
    }

    /// Lock wait timeout.
    pub fn lock_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_wait_timeout_ms)
    }
}
