//! Entity values: one timestamped, counted fact about a named entity.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Keys of a raw extractor dictionary that are not copied into metadata.
const RESERVED_KEYS: [&str; 3] = ["value", "counter", "timestamp"];

/// A single immutable value of a named entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityValue {
    /// Name of the entity this value belongs to
    pub entity: String,
    /// The value itself (scalar or structured payload)
    pub value: Value,
    /// Context counter at creation
    pub counter: u64,
    /// Wall-clock creation time
    pub timestamp: DateTime<Utc>,
    /// Full name of the state that was current when the value was set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_set: Option<String>,
    /// Extra keys supplied by the extractor (e.g. confidence)
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl EntityValue {
    /// Create a value stamped with the current time.
    pub fn new(entity: impl Into<String>, value: impl Into<Value>, counter: u64) -> Self {
        Self {
            entity: entity.into(),
            value: value.into(),
            counter,
            timestamp: Utc::now(),
            state_set: None,
            metadata: Map::new(),
        }
    }

    /// Build a value from an extractor dictionary such as
    /// `{"value": "pizza", "confidence": 0.92}`.
    pub fn from_raw(
        entity: impl Into<String>,
        raw: &Map<String, Value>,
        counter: u64,
    ) -> Result<Self> {
        let entity = entity.into();
        let value = raw.get("value").cloned().ok_or_else(|| {
            Error::value_type(format!(
                "Entity {entity} must be given as a map with a \"value\" key"
            ))
        })?;

        let metadata = raw
            .iter()
            .filter(|(key, _)| !RESERVED_KEYS.contains(&key.as_str()))
            .map(|(key, v)| (key.clone(), v.clone()))
            .collect();

        Ok(Self {
            entity,
            value,
            counter,
            timestamp: Utc::now(),
            state_set: None,
            metadata,
        })
    }

    /// Set the creation time.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Set the originating state.
    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state_set = Some(state.into());
        self
    }

    /// Add a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Get a metadata value.
    pub fn get_metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// Age in messages relative to the given counter.
    pub fn age(&self, counter_now: u64) -> u64 {
        counter_now.saturating_sub(self.counter)
    }
}
