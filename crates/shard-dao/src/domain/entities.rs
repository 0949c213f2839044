//! # Domain Entities
//!
//! Contracts for the two entity families the accessors persist, and the
//! mapping between an entity and its stored document.
//!
//! Entities are stored as JSON objects. The storage engine owns the
//! surrogate [`ID_COLUMN`] of every document and writes it on insert.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::errors::{RowId, ShardError};

/// Column holding the shard-local surrogate id.
pub const ID_COLUMN: &str = "id";

/// Keyed (parent) entity: one row per shard key.
pub trait LookupEntity: Serialize + DeserializeOwned + Clone + Send + 'static {
    /// Table the entity lives in.
    const TABLE: &'static str;

    /// Shard key; immutable for the lifetime of the row.
    fn shard_key(&self) -> &str;

    /// Reject data the storage layer must never see.
    fn validate(&self) -> Result<(), ShardError> {
        Ok(())
    }
}

/// Dependent (child) entity, tagged with its parent's shard key.
pub trait RelationalEntity: Serialize + DeserializeOwned + Clone + Send + 'static {
    /// Table the entity lives in.
    const TABLE: &'static str;

    /// Shard key of the owning parent.
    fn shard_key(&self) -> &str;

    /// Surrogate id; `None` until inserted.
    fn id(&self) -> Option<RowId>;

    /// Reject data the storage layer must never see.
    fn validate(&self) -> Result<(), ShardError> {
        Ok(())
    }
}

/// Map an entity to its stored document.
pub fn to_document<E: Serialize>(entity: &E) -> Result<Value, ShardError> {
    let doc = serde_json::to_value(entity)?;
    if !doc.is_object() {
        return Err(ShardError::validation(
            "entity must serialize to a JSON object",
        ));
    }
    Ok(doc)
}

/// Map a stored document back to its entity.
pub fn from_document<E: DeserializeOwned>(doc: Value) -> Result<E, ShardError> {
    Ok(serde_json::from_value(doc)?)
}
