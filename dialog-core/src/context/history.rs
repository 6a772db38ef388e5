//! Bounded histories backing the context: per-entity value lists and the
//! visited-state trail.

use super::value::EntityValue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Newest-first, bounded list of one entity's values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityHistory {
    values: VecDeque<EntityValue>,
}

impl EntityHistory {
    /// Create an empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a history from values already ordered newest-first.
    ///
    /// Lists that violate the ordering are stably re-sorted by counter.
    pub fn from_values(values: Vec<EntityValue>) -> Self {
        let mut history = Self {
            values: values.into(),
        };
        if !history.is_newest_first() {
            tracing::warn!("Entity history out of order, re-sorting by counter");
            history
                .values
                .make_contiguous()
                .sort_by(|a, b| b.counter.cmp(&a.counter));
        }
        history
    }

    /// Insert a value at the front, evicting the oldest beyond `bound`.
    pub fn push_front(&mut self, value: EntityValue, bound: usize) {
        self.values.push_front(value);
        self.truncate(bound);
    }

    /// Drop the oldest values so that at most `bound` remain.
    pub fn truncate(&mut self, bound: usize) {
        self.values.truncate(bound);
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the history holds no values.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Freshest value.
    pub fn front(&self) -> Option<&EntityValue> {
        self.values.front()
    }

    /// Iterate newest to oldest.
    pub fn iter(&self) -> impl Iterator<Item = &EntityValue> {
        self.values.iter()
    }

    /// Counters never increase from front to back.
    pub fn is_newest_first(&self) -> bool {
        self.values
            .iter()
            .zip(self.values.iter().skip(1))
            .all(|(newer, older)| newer.counter >= older.counter)
    }

    /// Copy out the values, newest first.
    pub fn to_vec(&self) -> Vec<EntityValue> {
        self.values.iter().cloned().collect()
    }
}

/// One visited state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateVisit {
    /// Full state name (`flow.state`)
    pub name: String,
    /// When the state was entered
    pub timestamp: DateTime<Utc>,
}

impl StateVisit {
    /// Record a visit happening now.
    pub fn now(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value(counter: u64) -> EntityValue {
        EntityValue::new("e", counter, counter)
    }

    #[test]
    fn test_push_front_evicts_oldest() {
        let mut history = EntityHistory::new();
        for counter in 0..5 {
            history.push_front(value(counter), 3);
        }

        let counters: Vec<u64> = history.iter().map(|v| v.counter).collect();
        assert_eq!(counters, vec![4, 3, 2]);
        assert!(history.is_newest_first());
    }

    #[test]
    fn test_from_values_restores_order() {
        let history = EntityHistory::from_values(vec![value(1), value(3), value(2)]);
        let counters: Vec<u64> = history.iter().map(|v| v.counter).collect();
        assert_eq!(counters, vec![3, 2, 1]);
        assert!(history.is_newest_first());
    }

    #[test]
    fn test_equal_counters_keep_insertion_order() {
        let mut history = EntityHistory::new();
        history.push_front(EntityValue::new("e", "a", 1), 10);
        history.push_front(EntityValue::new("e", "b", 1), 10);

        assert!(history.is_newest_first());
        assert_eq!(history.front().unwrap().value, "b");
    }
}
