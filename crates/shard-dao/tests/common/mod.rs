//! Shared fixture: two balanced shards, keys parsed as integers.

#![allow(dead_code)]

use serde::{Deserialize, Serialize};
use shard_dao::{
    parse_bucket, InMemoryShardStore, LookupDao, LookupEntity, RelationalDao, RelationalEntity,
    RowId, ShardCalculator, ShardError, ShardManager, DEFAULT_LOCK_WAIT,
};
use shard_telemetry::{init_logging, TelemetryConfig};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Parent {
    pub my_id: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl LookupEntity for Parent {
    const TABLE: &'static str = "parents";

    fn shard_key(&self) -> &str {
        &self.my_id
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Child {
    #[serde(default)]
    pub id: Option<RowId>,
    pub my_id: String,
    pub value: String,
}

impl RelationalEntity for Child {
    const TABLE: &'static str = "children";

    fn shard_key(&self) -> &str {
        &self.my_id
    }

    fn id(&self) -> Option<RowId> {
        self.id
    }

    fn validate(&self) -> Result<(), ShardError> {
        if self.value.is_empty() {
            return Err(ShardError::validation("child value is required"));
        }
        Ok(())
    }
}

pub fn parent(my_id: &str, name: Option<&str>) -> Parent {
    Parent {
        my_id: my_id.to_string(),
        name: name.map(str::to_string),
    }
}

pub fn child(my_id: &str, value: &str) -> Child {
    Child {
        id: None,
        my_id: my_id.to_string(),
        value: value.to_string(),
    }
}

pub fn has_name(parent: &Parent) -> bool {
    parent.name.as_deref().is_some_and(|name| !name.is_empty())
}

pub struct Fixture {
    pub store: Arc<InMemoryShardStore>,
    pub parents: LookupDao<Parent>,
    pub children: RelationalDao<Child>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_lock_wait(DEFAULT_LOCK_WAIT)
    }

    pub fn with_lock_wait(lock_wait: Duration) -> Self {
        // Only the first test in the binary gets to install the subscriber.
        let _ = init_logging(&TelemetryConfig::for_testing());

        let store = Arc::new(InMemoryShardStore::with_lock_wait(2, lock_wait));
        let calculator = Arc::new(ShardCalculator::new(
            ShardManager::balanced(2).unwrap(),
            parse_bucket,
        ));
        Self {
            parents: LookupDao::new(store.clone(), calculator.clone()).unwrap(),
            children: RelationalDao::new(store.clone(), calculator).unwrap(),
            store,
        }
    }

    pub fn name_of(&self, key: &str) -> Option<String> {
        self.parents.get(key).unwrap().unwrap().name
    }

    pub fn value_of(&self, key: &str, id: RowId) -> String {
        self.children.get(key, id).unwrap().unwrap().value
    }
}
