//! The per-session context: versioned entity histories, the message
//! counter and the visited-state trail.

use super::history::{EntityHistory, StateVisit};
use super::query::EntityQuery;
use super::value::EntityValue;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, VecDeque};
use std::fmt::Write as _;

/// Default bound on each entity's value history.
pub const DEFAULT_MAX_DEPTH: usize = 30;

/// Default bound on the visited-state history.
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Separator between a compound entity and its role.
pub const ROLE_SEPARATOR: &str = "__";

/// Serialized form of a [`Context`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextDocument {
    /// Visited states, oldest first
    #[serde(default)]
    pub history: Vec<StateVisit>,
    /// Entity name -> values, newest first
    #[serde(default)]
    pub entities: BTreeMap<String, Vec<EntityValue>>,
    /// Message counter
    #[serde(default)]
    pub counter: u64,
}

/// Temporal store of entity values for one conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct Context {
    counter: u64,
    entities: BTreeMap<String, EntityHistory>,
    history: VecDeque<StateVisit>,
    max_depth: usize,
    history_limit: usize,
    current_state: Option<String>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    /// Create an empty context with default bounds.
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_DEPTH, DEFAULT_HISTORY_LIMIT)
    }

    /// Create an empty context with explicit bounds.
    pub fn with_limits(max_depth: usize, history_limit: usize) -> Self {
        Self {
            counter: 0,
            entities: BTreeMap::new(),
            history: VecDeque::new(),
            max_depth,
            history_limit,
            current_state: None,
        }
    }

    // ==================== Counter & State ====================

    /// Current message counter.
    pub fn counter(&self) -> u64 {
        self.counter
    }

    /// Advance the counter by one message and return the new value.
    pub fn advance(&mut self) -> u64 {
        self.counter += 1;
        self.counter
    }

    /// Name of the state new values are attributed to.
    pub fn current_state(&self) -> Option<&str> {
        self.current_state.as_deref()
    }

    /// Set the state new values are attributed to.
    pub fn set_current_state(&mut self, name: impl Into<String>) {
        self.current_state = Some(name.into());
    }

    /// Configured per-entity bound.
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Values kept per entity by the mutators.
    fn depth_bound(&self) -> usize {
        self.max_depth.saturating_sub(1).max(1)
    }

    // ==================== Mutation ====================

    /// Merge extractor output into the context.
    ///
    /// Each entry may be a scalar, a `{"value": ..}` map, a compound
    /// `{"values": [{role: value}, ..]}` map, or a list of those. Compound
    /// entities fan out into `entity__role`.
    pub fn add_entities(&mut self, entities: &Map<String, Value>) -> Result<()> {
        for (name, spec) in entities {
            match spec {
                Value::Null => {}
                Value::Array(items) => {
                    for item in items {
                        self.add_entity_spec(name, item)?;
                    }
                }
                other => self.add_entity_spec(name, other)?,
            }
        }
        tracing::debug!(counter = self.counter, entities = entities.len(), "Added entities");
        Ok(())
    }

    fn add_entity_spec(&mut self, name: &str, spec: &Value) -> Result<()> {
        match spec {
            Value::Null => Ok(()),
            Value::Object(map) => self.add_entity_map(name, map),
            scalar => {
                let value = self.stamp(EntityValue::new(name, scalar.clone(), self.counter));
                self.push(name, value);
                Ok(())
            }
        }
    }

    fn add_entity_map(&mut self, name: &str, map: &Map<String, Value>) -> Result<()> {
        if !map.contains_key("value") && !map.contains_key("values") {
            return Err(Error::value_type(format!(
                "Entity {name} must carry either \"value\" or \"values\""
            )));
        }

        if map.contains_key("value") {
            let value = self.stamp(EntityValue::from_raw(name, map, self.counter)?);
            self.push(name, value);
        }

        if let Some(values) = map.get("values") {
            let Value::Array(items) = values else {
                return Err(Error::value_type(format!(
                    "Compound entity {name} must carry a list of role maps"
                )));
            };
            for item in items {
                let Value::Object(roles) = item else {
                    return Err(Error::value_type(format!(
                        "Compound entity {name} must carry a list of role maps"
                    )));
                };
                for (role, role_value) in roles {
                    let canon = format!("{name}{ROLE_SEPARATOR}{role}");
                    let value =
                        self.stamp(EntityValue::new(&canon, role_value.clone(), self.counter));
                    self.push(&canon, value);
                }
            }
        }
        Ok(())
    }

    /// Set a value from a `{"value": ..}` map, tagged with the current counter.
    pub fn set(&mut self, name: &str, spec: Value) -> Result<()> {
        let Value::Object(map) = spec else {
            return Err(Error::value_type(
                "Use a map to set a context value, e.g. {\"value\": \"foo\"}",
            ));
        };
        let value = self.stamp(EntityValue::from_raw(name, &map, self.counter)?);
        self.push(name, value);
        Ok(())
    }

    /// Set a plain value, tagged with the current counter.
    pub fn set_value(&mut self, name: &str, value: impl Into<Value>) {
        let value = self.stamp(EntityValue::new(name, value, self.counter));
        self.push(name, value);
    }

    /// Insert a prebuilt value; it must belong to `name`.
    pub fn insert(&mut self, name: &str, value: EntityValue) -> Result<()> {
        if value.entity != name {
            return Err(Error::value_type(format!(
                "Value of entity {} cannot be stored as {name}",
                value.entity
            )));
        }
        self.push(name, value);
        Ok(())
    }

    fn stamp(&self, mut value: EntityValue) -> EntityValue {
        if value.state_set.is_none() {
            value.state_set.clone_from(&self.current_state);
        }
        value
    }

    fn push(&mut self, name: &str, value: EntityValue) {
        let bound = self.depth_bound();
        self.entities
            .entry(name.to_string())
            .or_default()
            .push_front(value, bound);
    }

    /// Delete the entire history of each named entity.
    pub fn clear<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for name in names {
            self.entities.remove(name.as_ref());
        }
    }

    /// Record a visited state, evicting the oldest beyond the history limit.
    pub fn add_state(&mut self, name: impl Into<String>) {
        self.history.push_back(StateVisit::now(name));
        while self.history.len() > self.history_limit {
            self.history.pop_front();
        }
    }

    // ==================== Lookup ====================

    /// Whether the entity has at least one value.
    pub fn contains(&self, name: &str) -> bool {
        self.entities.get(name).is_some_and(|h| !h.is_empty())
    }

    /// Whether every named entity has at least one value.
    pub fn contains_all<I, S>(&self, names: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names.into_iter().all(|name| self.contains(name.as_ref()))
    }

    /// Values of an entity, newest first.
    ///
    /// Scanning stops at the first value older than `max_age`. Values in
    /// `ignored` are skipped and do not count toward `limit`.
    pub fn get_all(
        &self,
        name: &str,
        max_age: Option<u64>,
        limit: Option<usize>,
        ignored: &[Value],
    ) -> Vec<&EntityValue> {
        let mut values = Vec::new();
        let Some(history) = self.entities.get(name) else {
            return values;
        };
        for value in history.iter() {
            if max_age.is_some_and(|max| value.age(self.counter) > max) {
                break;
            }
            if ignored.contains(&value.value) {
                tracing::debug!(
                    entity = name,
                    value = %value.value,
                    "Skipping ignored entity value"
                );
                continue;
            }
            values.push(value);
            if limit.is_some_and(|limit| values.len() >= limit) {
                break;
            }
        }
        values
    }

    /// Freshest value of an entity.
    pub fn get(&self, name: &str, max_age: Option<u64>, ignored: &[Value]) -> Option<&EntityValue> {
        self.get_all(name, max_age, Some(1), ignored).into_iter().next()
    }

    /// Payload of the freshest value of an entity.
    pub fn get_value(&self, name: &str, max_age: Option<u64>, ignored: &[Value]) -> Option<&Value> {
        self.get(name, max_age, ignored).map(|v| &v.value)
    }

    /// Freshest value of an entity together with its age.
    pub fn get_age(&self, name: &str, max_age: Option<u64>) -> Option<(&EntityValue, u64)> {
        self.get(name, max_age, &[])
            .map(|value| (value, value.age(self.counter)))
    }

    /// Distinct values of the newest age tier, in insertion order.
    pub fn get_all_first(&self, name: &str, max_age: Option<u64>) -> Vec<&EntityValue> {
        let mut values: Vec<&EntityValue> = Vec::new();
        let Some(history) = self.entities.get(name) else {
            return values;
        };
        let mut found_age = None;
        for value in history.iter() {
            let age = value.age(self.counter);
            if max_age.is_some_and(|max| age > max) {
                break;
            }
            if found_age.is_some_and(|found| age > found) {
                break;
            }
            found_age = Some(age);
            if values.iter().any(|seen| seen.value == value.value) {
                continue;
            }
            values.push(value);
        }
        values.reverse();
        values
    }

    /// Smallest freshest-value age among the named entities.
    pub fn get_min_entity_age<I, S>(&self, names: I) -> Option<u64>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names
            .into_iter()
            .filter_map(|name| self.get_age(name.as_ref(), None).map(|(_, age)| age))
            .min()
    }

    /// Whether any named entity has a value within `max_age`.
    pub fn has_any<I, S>(&self, names: I, max_age: Option<u64>) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names
            .into_iter()
            .any(|name| self.get(name.as_ref(), max_age, &[]).is_some())
    }

    /// Whether every named entity has a value within `max_age`.
    pub fn has_all<I, S>(&self, names: I, max_age: Option<u64>) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names
            .into_iter()
            .all(|name| self.get(name.as_ref(), max_age, &[]).is_some())
    }

    /// Start a filter chain over one entity's values.
    pub fn query(&self, name: &str) -> EntityQuery<'_> {
        EntityQuery::new(self, name)
    }

    /// History of one entity, if any value was ever stored.
    pub fn entity_history(&self, name: &str) -> Option<&EntityHistory> {
        self.entities.get(name)
    }

    /// Names of all stored entities.
    pub fn entity_names(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }

    /// Visited states, oldest first.
    pub fn history(&self) -> &VecDeque<StateVisit> {
        &self.history
    }

    /// Visited state by position; negative indexes count from the end.
    pub fn get_history_state(&self, index: isize) -> Option<&StateVisit> {
        let len = self.history.len() as isize;
        let index = if index < 0 { len + index } else { index };
        if index < 0 {
            return None;
        }
        self.history.get(index as usize)
    }

    /// Render the head of every entity list, for diagnostics.
    pub fn debug_dump(&self, max_age: u64) -> String {
        let mut out = format!("-- HEAD of Context (max age {max_age}) --\n");
        for name in self.entities.keys() {
            let values = self.get_all_first(name, Some(max_age));
            let Some(first) = values.first() else {
                continue;
            };
            let age = first.age(self.counter);
            if values.len() == 1 {
                let _ = writeln!(out, "{name} (age {age}): {}", first.value);
            } else {
                let rendered: Vec<String> = values.iter().map(|v| v.value.to_string()).collect();
                let _ = writeln!(out, "{name} (age {age}): [{}]", rendered.join(", "));
            }
        }
        out.push_str("----------------------------------");
        out
    }

    // ==================== Serialization ====================

    /// Export the context as a structured document.
    pub fn to_document(&self) -> ContextDocument {
        ContextDocument {
            history: self.history.iter().cloned().collect(),
            entities: self
                .entities
                .iter()
                .map(|(name, history)| (name.clone(), history.to_vec()))
                .collect(),
            counter: self.counter,
        }
    }

    /// Rebuild a context from a document.
    pub fn from_document(
        document: ContextDocument,
        max_depth: usize,
        history_limit: usize,
    ) -> Self {
        let mut history: VecDeque<StateVisit> = document.history.into();
        while history.len() > history_limit {
            history.pop_front();
        }
        Self {
            counter: document.counter,
            entities: document
                .entities
                .into_iter()
                .map(|(name, values)| (name, EntityHistory::from_values(values)))
                .collect(),
            history,
            max_depth,
            history_limit,
            current_state: None,
        }
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.to_document())?)
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str, max_depth: usize, history_limit: usize) -> Result<Self> {
        let document: ContextDocument = serde_json::from_str(json)?;
        Ok(Self::from_document(document, max_depth, history_limit))
    }
}
