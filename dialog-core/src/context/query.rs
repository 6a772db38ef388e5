//! Chainable temporal filters over one entity's values.
//!
//! ```rust,ignore
//! use dialog_core::context::{Context, TimeFilter};
//!
//! let ctx = Context::new();
//! let fresh = ctx
//!     .query("intent")
//!     .newer_than(TimeFilter::messages(2))
//!     .exclude_flow("default")?
//!     .latest_value();
//! ```

use super::filter::{EntityFilter, FilterRule};
use super::store::Context;
use super::value::EntityValue;
use crate::error::{Error, Result};
use crate::pattern::prefix_pattern;
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;

/// Half-width of the window used by [`EntityQuery::exactly`] on time axes.
const EXACT_TIME_TOLERANCE_MS: i64 = 1_000;

/// One temporal axis a value can be compared on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeFilter {
    /// Distance in processed messages
    Messages(u64),
    /// Wall-clock distance from now
    Delta(Duration),
    /// Absolute point in time
    At(DateTime<Utc>),
}

impl TimeFilter {
    /// Compare by message count.
    pub fn messages(count: u64) -> Self {
        Self::Messages(count)
    }

    /// Compare by time elapsed since now.
    pub fn delta(delta: Duration) -> Self {
        Self::Delta(delta)
    }

    /// Compare against an absolute time.
    pub fn at(time: DateTime<Utc>) -> Self {
        Self::At(time)
    }

    /// Build from optional axes; exactly one must be given.
    pub fn from_parts(
        messages: Option<u64>,
        delta: Option<Duration>,
        at: Option<DateTime<Utc>>,
    ) -> Result<Self> {
        match (messages, delta, at) {
            (Some(m), None, None) => Ok(Self::Messages(m)),
            (None, Some(d), None) => Ok(Self::Delta(d)),
            (None, None, Some(t)) => Ok(Self::At(t)),
            (None, None, None) => Err(Error::invalid_query(
                "Specify one of message count, time delta or absolute time",
            )),
            _ => Err(Error::invalid_query(
                "Please use either message count, time delta or absolute time",
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Comparison {
    Newer,
    Older,
    Exactly,
}

/// A lazy, restartable filter chain over a snapshot of one entity's values.
///
/// Filters consume and return the query; reducers borrow it. The query
/// never mutates the context it was built from.
#[derive(Debug, Clone)]
pub struct EntityQuery<'a> {
    context: &'a Context,
    name: String,
    items: Vec<&'a EntityValue>,
}

impl<'a> EntityQuery<'a> {
    /// Start a query over every stored value of `name`.
    pub fn new(context: &'a Context, name: &str) -> Self {
        let items = context
            .entity_history(name)
            .map(|history| history.iter().collect())
            .unwrap_or_default();
        Self {
            context,
            name: name.to_string(),
            items,
        }
    }

    /// Build a query from a prepared filter.
    pub fn from_filter(context: &'a Context, name: &str, filter: &EntityFilter) -> Self {
        Self::new(context, name).apply(filter)
    }

    /// Name of the queried entity (`a|b` after a union).
    pub fn name(&self) -> &str {
        &self.name
    }

    // ==================== Temporal Filters ====================

    /// Keep values strictly newer than the threshold.
    pub fn newer_than(self, filter: TimeFilter) -> Self {
        self.retain_time(Comparison::Newer, filter)
    }

    /// Keep values strictly older than the threshold.
    pub fn older_than(self, filter: TimeFilter) -> Self {
        self.retain_time(Comparison::Older, filter)
    }

    /// Keep values at exactly the threshold (±1 s on time axes).
    pub fn exactly(self, filter: TimeFilter) -> Self {
        self.retain_time(Comparison::Exactly, filter)
    }

    fn retain_time(mut self, comparison: Comparison, filter: TimeFilter) -> Self {
        let counter_now = self.context.counter();
        let reference = match filter {
            TimeFilter::Messages(_) => None,
            TimeFilter::Delta(delta) => Some(Utc::now() - delta),
            TimeFilter::At(time) => Some(time),
        };

        self.items.retain(|item| match (filter, reference) {
            (TimeFilter::Messages(messages), _) => {
                let age = item.age(counter_now);
                match comparison {
                    Comparison::Newer => age < messages,
                    Comparison::Older => age > messages,
                    Comparison::Exactly => age == messages,
                }
            }
            (_, Some(reference)) => match comparison {
                Comparison::Newer => item.timestamp > reference,
                Comparison::Older => item.timestamp < reference,
                Comparison::Exactly => {
                    (item.timestamp - reference).num_milliseconds().abs()
                        < EXACT_TIME_TOLERANCE_MS
                }
            },
            (_, None) => false,
        });
        self
    }

    // ==================== Provenance Filters ====================

    /// Keep values set in a state matching the prefix pattern.
    pub fn include_flow(self, pattern: &str) -> Result<Self> {
        Ok(self.include_flow_regex(&prefix_pattern(pattern)?))
    }

    /// Drop values set in a state matching the prefix pattern.
    pub fn exclude_flow(self, pattern: &str) -> Result<Self> {
        Ok(self.exclude_flow_regex(&prefix_pattern(pattern)?))
    }

    /// Keep values whose originating state matches a compiled pattern.
    pub fn include_flow_regex(mut self, pattern: &Regex) -> Self {
        self.items.retain(|item| {
            item.state_set
                .as_deref()
                .is_some_and(|state| pattern.is_match(state))
        });
        self
    }

    /// Drop values whose originating state matches a compiled pattern.
    pub fn exclude_flow_regex(mut self, pattern: &Regex) -> Self {
        self.items.retain(|item| {
            !item
                .state_set
                .as_deref()
                .is_some_and(|state| pattern.is_match(state))
        });
        self
    }

    // ==================== Correlation ====================

    /// Keep values set in the same message as `entity == value`.
    pub fn set_with(mut self, entity: &str, value: &Value) -> Self {
        let counters = self.correlated_counters(entity, value);
        self.items.retain(|item| counters.contains(&item.counter));
        self
    }

    /// Keep values not set in the same message as `entity == value`.
    pub fn not_set_with(mut self, entity: &str, value: &Value) -> Self {
        let counters = self.correlated_counters(entity, value);
        self.items.retain(|item| !counters.contains(&item.counter));
        self
    }

    fn correlated_counters(&self, entity: &str, value: &Value) -> HashSet<u64> {
        self.context
            .entity_history(entity)
            .map(|history| {
                history
                    .iter()
                    .filter(|other| &other.value == value)
                    .map(|other| other.counter)
                    .collect()
            })
            .unwrap_or_default()
    }

    // ==================== Declarative Rules ====================

    /// Apply a prepared rule list left to right.
    pub fn apply(self, filter: &EntityFilter) -> Self {
        self.apply_rules(filter.rules())
    }

    fn apply_rules(self, rules: &[FilterRule]) -> Self {
        rules.iter().fold(self, |query, rule| query.apply_rule(rule))
    }

    fn apply_rule(self, rule: &FilterRule) -> Self {
        match rule {
            FilterRule::Or(branches) => {
                let mut union: Vec<&'a EntityValue> = Vec::new();
                for branch in branches {
                    let matched = EntityQuery::new(self.context, &self.name).apply_rules(branch);
                    for item in matched.items {
                        if !union.iter().any(|seen| std::ptr::eq(*seen, item)) {
                            union.push(item);
                        }
                    }
                }
                self.retain_items(&union)
            }
            FilterRule::SetWith { entity, value } => self.set_with(entity, value),
            FilterRule::NotSetWith { entity, value } => self.not_set_with(entity, value),
            FilterRule::IncludeFlow(pattern) => self.include_flow_regex(pattern),
            FilterRule::ExcludeFlow(pattern) => self.exclude_flow_regex(pattern),
            FilterRule::Newer(filter) => self.newer_than(*filter),
            FilterRule::Older(filter) => self.older_than(*filter),
            FilterRule::Exactly(filter) => self.exactly(*filter),
        }
    }

    fn retain_items(mut self, keep: &[&'a EntityValue]) -> Self {
        self.items
            .retain(|item| keep.iter().any(|kept| std::ptr::eq(*kept, *item)));
        self
    }

    // ==================== Set Algebra ====================

    /// Items of either query. Both must come from the same context.
    pub fn union(mut self, other: EntityQuery<'a>) -> Result<Self> {
        self.ensure_same_context(&other, "union")?;
        for item in other.items {
            if !self.items.iter().any(|seen| std::ptr::eq(*seen, item)) {
                self.items.push(item);
            }
        }
        self.name = format!("{}|{}", self.name, other.name);
        Ok(self)
    }

    /// Items present in both queries. Both must come from the same context.
    pub fn intersection(self, other: EntityQuery<'a>) -> Result<Self> {
        self.ensure_same_context(&other, "intersection")?;
        Ok(self.retain_items(&other.items))
    }

    fn ensure_same_context(&self, other: &EntityQuery<'a>, operation: &str) -> Result<()> {
        if std::ptr::eq(self.context, other.context) {
            Ok(())
        } else {
            Err(Error::invalid_query(format!(
                "Refusing {operation} of {} and {}: queries come from different contexts",
                self.name, other.name
            )))
        }
    }

    // ==================== Reducers ====================

    /// Value with the greatest timestamp.
    pub fn latest(&self) -> Option<&'a EntityValue> {
        self.items.iter().copied().fold(None, |best, item| match best {
            Some(best) if best.timestamp >= item.timestamp => Some(best),
            _ => Some(item),
        })
    }

    /// Payload of [`Self::latest`].
    pub fn latest_value(&self) -> Option<&'a Value> {
        self.latest().map(|item| &item.value)
    }

    /// The latest value, only if it was set in the current message.
    pub fn current(&self) -> Option<&'a EntityValue> {
        self.latest()
            .filter(|item| item.counter == self.context.counter())
    }

    /// Payload of [`Self::current`].
    pub fn current_value(&self) -> Option<&'a Value> {
        self.current().map(|item| &item.value)
    }

    /// Latest payload together with its age in messages.
    pub fn get_age(&self) -> Option<(&'a Value, u64)> {
        self.latest()
            .map(|item| (&item.value, item.age(self.context.counter())))
    }

    /// Remaining values, in list order.
    pub fn all(&self) -> Vec<&'a EntityValue> {
        self.items.clone()
    }

    /// Remaining payloads, in list order.
    pub fn all_values(&self) -> Vec<&'a Value> {
        self.items.iter().map(|item| &item.value).collect()
    }

    /// Number of remaining values.
    pub fn count(&self) -> usize {
        self.items.len()
    }

    /// Whether no value remains.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
