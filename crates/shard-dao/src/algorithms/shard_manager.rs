//! # Shard Manager
//!
//! Deterministic bucket-to-shard mapping.
//!
//! Two strategies are supported and are not interchangeable once data exists:
//!
//! - **Balanced**: `bucket mod n`. Uniform, any positive shard count.
//! - **Legacy**: the fixed `0..=999` bucket space split into `n` contiguous
//!   ranges of width `1000 / n`, the last range absorbing the remainder.
//!   Only power-of-two counts in `16..=512` are accepted.
//!
//! Changing the shard count of either strategy after data has been written
//! re-homes keys; nothing here migrates data.

use crate::domain::{
    BucketId, ShardError, ShardId, ShardStrategy, LEGACY_BUCKET_SPACE, MAX_LEGACY_SHARD_COUNT,
    MIN_LEGACY_SHARD_COUNT,
};

/// Bucket-to-shard strategy with its shard count.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShardManager {
    /// `bucket mod shard_count`.
    Balanced {
        /// Number of shards.
        shard_count: u16,
    },
    /// Contiguous ranges over the legacy bucket space.
    Legacy {
        /// Number of shards.
        shard_count: u16,
        /// Width of each range.
        interval: BucketId,
    },
}

impl ShardManager {
    /// Balanced manager over `shard_count` shards.
    pub fn balanced(shard_count: u16) -> Result<Self, ShardError> {
        if shard_count == 0 {
            return Err(ShardError::InvalidConfig(
                "balanced shard count must be positive".to_string(),
            ));
        }
        Ok(Self::Balanced { shard_count })
    }

    /// Legacy manager over `shard_count` shards.
    ///
    /// Fails unless `shard_count` is a power of two in `16..=512`.
    pub fn legacy(shard_count: u16) -> Result<Self, ShardError> {
        if !shard_count.is_power_of_two() {
            return Err(ShardError::InvalidConfig(format!(
                "legacy shard count must be a power of two, got {shard_count}"
            )));
        }
        if shard_count < MIN_LEGACY_SHARD_COUNT {
            return Err(ShardError::InvalidConfig(format!(
                "legacy shard count must be at least {MIN_LEGACY_SHARD_COUNT}, got {shard_count}"
            )));
        }
        if shard_count > MAX_LEGACY_SHARD_COUNT {
            return Err(ShardError::InvalidConfig(format!(
                "legacy shard count must be at most {MAX_LEGACY_SHARD_COUNT}, got {shard_count}"
            )));
        }

        Ok(Self::Legacy {
            shard_count,
            interval: LEGACY_BUCKET_SPACE / BucketId::from(shard_count),
        })
    }

    /// Manager for a configured strategy.
    pub fn from_strategy(strategy: ShardStrategy, shard_count: u16) -> Result<Self, ShardError> {
        match strategy {
            ShardStrategy::Balanced => Self::balanced(shard_count),
            ShardStrategy::Legacy => Self::legacy(shard_count),
        }
    }

    /// Shard owning `bucket`.
    pub fn shard_for_bucket(&self, bucket: BucketId) -> ShardId {
        match *self {
            Self::Balanced { shard_count } => (bucket % BucketId::from(shard_count)) as ShardId,
            Self::Legacy {
                shard_count,
                interval,
            } => {
                let slot = (bucket % LEGACY_BUCKET_SPACE) / interval;
                slot.min(BucketId::from(shard_count) - 1) as ShardId
            }
        }
    }

    /// Number of shards.
    pub fn shard_count(&self) -> u16 {
        match *self {
            Self::Balanced { shard_count } | Self::Legacy { shard_count, .. } => shard_count,
        }
    }

    /// Strategy of this manager.
    pub fn strategy(&self) -> ShardStrategy {
        match self {
            Self::Balanced { .. } => ShardStrategy::Balanced,
            Self::Legacy { .. } => ShardStrategy::Legacy,
        }
    }
}
