//! # Domain Errors
//!
//! Error types for the sharding layer.

use thiserror::Error;

/// Shard index (u16 supports up to 65536 shards).
pub type ShardId = u16;

/// Bucket id derived from a shard key.
pub type BucketId = u64;

/// Shard-local surrogate row identifier, assigned on insert.
pub type RowId = u64;

/// Sharding error types.
#[derive(Debug, Error)]
pub enum ShardError {
    /// Shard manager or store configuration is invalid.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Shard key could not be turned into a bucket id.
    #[error("Invalid shard key {key:?}: {reason}")]
    InvalidKey {
        /// Offending key
        key: String,
        /// Why it was rejected
        reason: String,
    },

    /// Shard index outside the store's range.
    #[error("Unknown shard: {0}")]
    UnknownShard(ShardId),

    /// Required row is absent.
    #[error("No {table} row for {key}")]
    NotFound {
        /// Table searched
        table: String,
        /// Key or id searched for
        key: String,
    },

    /// Unique key constraint rejected an insert.
    #[error("Uniqueness conflict: {table} already holds key {key} on shard {shard}")]
    UniquenessConflict {
        /// Table holding the constraint
        table: String,
        /// Duplicate key
        key: String,
        /// Shard the insert ran on
        shard: ShardId,
    },

    /// Entity or producer rejected the data.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Row lock could not be acquired within the lock-wait timeout.
    #[error("Lock wait timeout on {table}#{id} after {waited_ms}ms")]
    LockTimeout {
        /// Table of the contended row
        table: String,
        /// Contended row
        id: RowId,
        /// Time spent waiting
        waited_ms: u64,
    },

    /// An operation resolved to a different shard than its transaction.
    #[error("Shard mismatch: transaction on shard {expected}, operation resolved to {actual}")]
    ShardMismatch {
        /// Shard the transaction is bound to
        expected: ShardId,
        /// Shard the operation resolved to
        actual: ShardId,
    },

    /// Invalid state transition.
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition {
        /// Current state
        from: String,
        /// Attempted state
        to: String,
    },

    /// Named update was never registered.
    #[error("Unknown named query: {0}")]
    UnknownQuery(String),

    /// Entity could not be mapped to or from a stored document.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Storage engine failure.
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Coarse error category, one per failure class callers must tell apart.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Construction-time misconfiguration.
    InvalidConfiguration,
    /// Required row absent.
    NotFound,
    /// Duplicate key rejected by the storage engine.
    UniquenessConflict,
    /// Data rejected by an entity, producer or mutator.
    Validation,
    /// Lock wait exceeded or illegal executor use.
    Concurrency,
    /// Engine or mapping failure.
    Storage,
}

impl ShardError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidConfig(_) | Self::UnknownShard(_) => ErrorKind::InvalidConfiguration,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::UniquenessConflict { .. } => ErrorKind::UniquenessConflict,
            Self::Validation(_) | Self::InvalidKey { .. } | Self::ShardMismatch { .. } => {
                ErrorKind::Validation
            }
            Self::LockTimeout { .. } | Self::InvalidTransition { .. } => ErrorKind::Concurrency,
            Self::UnknownQuery(_) | Self::Serialization(_) | Self::Storage(_) => {
                ErrorKind::Storage
            }
        }
    }

    /// Shorthand for a [`ShardError::Validation`] error.
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_shard_error() {
        let err = ShardError::UnknownShard(99);
        assert!(err.to_string().contains("99"));
        assert_eq!(err.kind(), ErrorKind::InvalidConfiguration);
    }

    #[test]
    fn test_uniqueness_conflict_error() {
        let err = ShardError::UniquenessConflict {
            table: "parents".to_string(),
            key: "0".to_string(),
            shard: 1,
        };
        assert!(err.to_string().contains("parents"));
        assert_eq!(err.kind(), ErrorKind::UniquenessConflict);
    }

    #[test]
    fn test_lock_timeout_error() {
        let err = ShardError::LockTimeout {
            table: "parents".to_string(),
            id: 7,
            waited_ms: 50,
        };
        assert!(err.to_string().contains("parents#7"));
        assert_eq!(err.kind(), ErrorKind::Concurrency);
    }

    #[test]
    fn test_validation_kind() {
        assert_eq!(
            ShardError::validation("name is required").kind(),
            ErrorKind::Validation
        );
    }

    #[test]
    fn test_serialization_from() {
        let err: ShardError = serde_json::from_str::<u64>("nope").unwrap_err().into();
        assert_eq!(err.kind(), ErrorKind::Storage);
    }
}
