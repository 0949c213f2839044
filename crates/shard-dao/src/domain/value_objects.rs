//! # Domain Value Objects
//!
//! Immutable value types for shard routing and chained execution.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::errors::ShardError;

/// Bucket-to-shard strategy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ShardStrategy {
    /// Uniform `bucket mod n` mapping.
    #[default]
    Balanced,
    /// Fixed range mapping kept for data written before `Balanced` existed.
    Legacy,
}

impl fmt::Display for ShardStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Balanced => write!(f, "balanced"),
            Self::Legacy => write!(f, "legacy"),
        }
    }
}

impl FromStr for ShardStrategy {
    type Err = ShardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "balanced" => Ok(Self::Balanced),
            "legacy" => Ok(Self::Legacy),
            other => Err(ShardError::InvalidConfig(format!(
                "unknown shard strategy: {other}"
            ))),
        }
    }
}

/// Locking executor state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ExecutorState {
    /// Accepting operations; parent lock and transaction held.
    #[default]
    Open,
    /// Committed (including a vetoed, empty commit).
    Executed,
    /// Rolled back.
    Failed,
}

impl ExecutorState {
    /// Check if transition to next state is valid.
    pub fn can_transition_to(&self, next: ExecutorState) -> bool {
        matches!(
            (self, next),
            (Self::Open, Self::Executed) | (Self::Open, Self::Failed)
        )
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Executed | Self::Failed)
    }
}

/// Row lock requested by a read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockMode {
    /// Plain read of committed data plus the reader's own writes.
    None,
    /// Exclusive row lock held until the transaction ends.
    Exclusive,
}
