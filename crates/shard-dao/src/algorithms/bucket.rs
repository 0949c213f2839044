//! # Bucket Extraction
//!
//! Functions turning a shard key into a bucket id.

use crate::domain::{BucketId, ShardError, HASHED_BUCKET_SPACE};
use sha3::{Digest, Keccak256};

/// Key parsed as a non-negative decimal integer.
pub fn parse_bucket(key: &str) -> Result<BucketId, ShardError> {
    key.parse::<BucketId>().map_err(|e| ShardError::InvalidKey {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

/// Keccak-256 of the key reduced into the hashed bucket space.
///
/// Total over all strings.
pub fn hashed_bucket(key: &str) -> Result<BucketId, ShardError> {
    let mut hasher = Keccak256::new();
    hasher.update(key.as_bytes());
    let digest = hasher.finalize();

    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    Ok(BucketId::from_be_bytes(prefix) % HASHED_BUCKET_SPACE)
}
