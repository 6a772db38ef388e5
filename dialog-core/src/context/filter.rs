//! Declarative requirement filters.
//!
//! A filter is a list of single-key rules interpreted left to right:
//!
//! ```yaml
//! filter:
//!   - exclude-flow: "default"
//!   - or:
//!       - set-with: "direction, from"
//!       - [ {newer: {messages: 2}}, {include-flow: "booking"} ]
//!   - older: {seconds: 5}
//! ```
//!
//! Rules are compiled once, at load time, into an [`EntityFilter`].

use super::query::TimeFilter;
use crate::error::{Error, Result};
use crate::pattern::prefix_pattern;
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

/// One compiled filter rule.
#[derive(Debug, Clone)]
pub enum FilterRule {
    /// Union of branches; each branch is a rule chain
    Or(Vec<Vec<FilterRule>>),
    /// Keep values set together with `entity == value`
    SetWith { entity: String, value: Value },
    /// Drop values set together with `entity == value`
    NotSetWith { entity: String, value: Value },
    /// Keep values set in a matching state
    IncludeFlow(Regex),
    /// Drop values set in a matching state
    ExcludeFlow(Regex),
    /// Keep values newer than the threshold
    Newer(TimeFilter),
    /// Keep values older than the threshold
    Older(TimeFilter),
    /// Keep values at the threshold
    Exactly(TimeFilter),
}

/// A prepared rule chain.
#[derive(Debug, Clone, Default)]
pub struct EntityFilter {
    rules: Vec<FilterRule>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TemporalArgs {
    messages: Option<u64>,
    seconds: Option<i64>,
    at: Option<DateTime<Utc>>,
}

impl EntityFilter {
    /// Create a filter from already compiled rules.
    pub fn new(rules: Vec<FilterRule>) -> Self {
        Self { rules }
    }

    /// Compile a declarative rule list.
    pub fn compile(definition: &Value) -> Result<Self> {
        Ok(Self {
            rules: compile_chain(definition)?,
        })
    }

    /// The compiled rules, in application order.
    pub fn rules(&self) -> &[FilterRule] {
        &self.rules
    }

    /// Whether the filter has no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// A chain is a list of rules; a lone rule map counts as a chain of one.
fn compile_chain(definition: &Value) -> Result<Vec<FilterRule>> {
    match definition {
        Value::Array(items) => items.iter().map(compile_rule).collect(),
        Value::Object(_) => Ok(vec![compile_rule(definition)?]),
        other => Err(Error::configuration(format!(
            "Filter must be a list of rules, got {other}"
        ))),
    }
}

fn compile_rule(definition: &Value) -> Result<FilterRule> {
    let Value::Object(map) = definition else {
        return Err(Error::configuration(format!(
            "Filter rule must be a single-key map, got {definition}"
        )));
    };
    let mut entries = map.iter();
    let (Some((key, args)), None) = (entries.next(), entries.next()) else {
        return Err(Error::configuration(format!(
            "Filter rule must have exactly one key, got {definition}"
        )));
    };

    match key.as_str() {
        "or" => {
            let Value::Array(branches) = args else {
                return Err(Error::configuration("\"or\" takes a list of branches"));
            };
            let branches = branches
                .iter()
                .map(compile_chain)
                .collect::<Result<Vec<_>>>()?;
            Ok(FilterRule::Or(branches))
        }
        "set-with" => {
            let (entity, value) = correlation_args(key, args)?;
            Ok(FilterRule::SetWith { entity, value })
        }
        "not-set-with" => {
            let (entity, value) = correlation_args(key, args)?;
            Ok(FilterRule::NotSetWith { entity, value })
        }
        "include-flow" => Ok(FilterRule::IncludeFlow(prefix_pattern(pattern_arg(
            key, args,
        )?)?)),
        "exclude-flow" => Ok(FilterRule::ExcludeFlow(prefix_pattern(pattern_arg(
            key, args,
        )?)?)),
        "newer" => Ok(FilterRule::Newer(temporal_args(key, args)?)),
        "older" => Ok(FilterRule::Older(temporal_args(key, args)?)),
        "exactly" => Ok(FilterRule::Exactly(temporal_args(key, args)?)),
        other => Err(Error::configuration(format!("Unknown filter rule: {other}"))),
    }
}

/// `"entity, value"` or `[entity, value]`.
fn correlation_args(key: &str, args: &Value) -> Result<(String, Value)> {
    match args {
        Value::String(raw) => {
            let (entity, value) = raw.split_once(", ").ok_or_else(|| {
                Error::configuration(format!("\"{key}\" expects \"entity, value\", got {raw:?}"))
            })?;
            Ok((entity.to_string(), Value::String(value.to_string())))
        }
        Value::Array(pair) if pair.len() == 2 => match &pair[0] {
            Value::String(entity) => Ok((entity.clone(), pair[1].clone())),
            other => Err(Error::configuration(format!(
                "\"{key}\" entity must be a string, got {other}"
            ))),
        },
        other => Err(Error::configuration(format!(
            "\"{key}\" expects \"entity, value\", got {other}"
        ))),
    }
}

fn pattern_arg<'v>(key: &str, args: &'v Value) -> Result<&'v str> {
    args.as_str()
        .ok_or_else(|| Error::configuration(format!("\"{key}\" expects a state pattern")))
}

fn temporal_args(key: &str, args: &Value) -> Result<TimeFilter> {
    let parsed: TemporalArgs = serde_json::from_value(args.clone()).map_err(|e| {
        Error::configuration(format!("\"{key}\" expects messages, seconds or at: {e}"))
    })?;
    TimeFilter::from_parts(
        parsed.messages,
        parsed.seconds.map(Duration::seconds),
        parsed.at,
    )
    .map_err(|e| Error::configuration(format!("\"{key}\": {e}")))
}
