//! # Domain Invariants
//!
//! Rules that must always hold for shard routing and chained execution.

use super::errors::{BucketId, ShardError, ShardId};

/// Smallest legacy shard count.
pub const MIN_LEGACY_SHARD_COUNT: u16 = 16;

/// Largest legacy shard count (largest power of two within the bucket space).
pub const MAX_LEGACY_SHARD_COUNT: u16 = 512;

/// Size of the legacy bucket space (`0..=999`).
pub const LEGACY_BUCKET_SPACE: BucketId = 1000;

/// Size of the bucket space produced by hashed bucket extraction.
pub const HASHED_BUCKET_SPACE: BucketId = 1024;

/// Invariant: the same bucket always lands on the same shard.
pub fn invariant_deterministic_assignment<F>(assign_fn: F, bucket: BucketId) -> bool
where
    F: Fn(BucketId) -> ShardId,
{
    assign_fn(bucket) == assign_fn(bucket)
}

/// Invariant: a shard index is within `[0, shard_count)`.
pub fn invariant_shard_in_range(shard: ShardId, shard_count: u16) -> bool {
    shard < shard_count
}

/// Invariant: every operation of a chain runs on the parent's shard.
pub fn invariant_single_shard(expected: ShardId, actual: ShardId) -> Result<(), ShardError> {
    if expected != actual {
        return Err(ShardError::ShardMismatch { expected, actual });
    }
    Ok(())
}

/// Invariant: a parent's shard key never changes.
pub fn invariant_shard_key_immutable(before: &str, after: &str) -> Result<(), ShardError> {
    if before != after {
        return Err(ShardError::Validation(format!(
            "shard key is immutable: {before:?} -> {after:?}"
        )));
    }
    Ok(())
}
