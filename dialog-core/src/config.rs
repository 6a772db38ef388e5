//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Compatibility tag written next to persisted sessions by default.
pub const DEFAULT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Configuration shared by every dialog manager of a process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogConfig {
    /// Compatibility tag; persisted sessions with another tag are discarded
    pub version: String,
    /// Bound on each entity's value history
    pub max_depth: usize,
    /// Bound on the visited-state history
    pub history_limit: usize,
    /// Message shown to the user when an action fails
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message_text: Option<String>,
    /// Whether user and bot messages are forwarded to the message logger
    pub should_log_messages: bool,
    /// Inactivity callbacks: name -> seconds of silence before firing
    #[serde(default)]
    pub inactive_callbacks: BTreeMap<String, u64>,
    /// Glob patterns of flow definition files
    #[serde(default)]
    pub flow_files: Vec<String>,
    /// Age horizon of the context debug dump
    pub debug_max_age: u64,
}

impl Default for DialogConfig {
    fn default() -> Self {
        Self {
            version: DEFAULT_VERSION.to_string(),
            max_depth: 30,
            history_limit: 20,
            error_message_text: None,
            should_log_messages: false,
            inactive_callbacks: BTreeMap::new(),
            flow_files: Vec::new(),
            debug_max_age: 5,
        }
    }
}

impl DialogConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            version: std::env::var("DIALOG_VERSION").unwrap_or(defaults.version),
            max_depth: std::env::var("DIALOG_MAX_DEPTH")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_depth),
            history_limit: defaults.history_limit,
            error_message_text: std::env::var("DIALOG_ERROR_MESSAGE").ok(),
            should_log_messages: std::env::var("DIALOG_LOG_MESSAGES")
                .map(|s| s != "0" && s.to_lowercase() != "false")
                .unwrap_or(false),
            inactive_callbacks: std::env::var("DIALOG_INACTIVE_CALLBACKS")
                .map(|s| parse_callbacks(&s))
                .unwrap_or_default(),
            flow_files: std::env::var("DIALOG_FLOW_FILES")
                .map(|s| {
                    s.split(':')
                        .filter(|p| !p.trim().is_empty())
                        .map(|p| p.trim().to_string())
                        .collect()
                })
                .unwrap_or_default(),
            debug_max_age: defaults.debug_max_age,
        }
    }

    /// Set the compatibility tag.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Set the per-entity history bound.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Set the visited-state history bound.
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    /// Set the message shown when an action fails.
    pub fn with_error_message(mut self, text: impl Into<String>) -> Self {
        self.error_message_text = Some(text.into());
        self
    }

    /// Enable or disable message logging.
    pub fn with_message_logging(mut self, enabled: bool) -> Self {
        self.should_log_messages = enabled;
        self
    }

    /// Register an inactivity callback.
    pub fn with_inactive_callback(mut self, name: impl Into<String>, seconds: u64) -> Self {
        self.inactive_callbacks.insert(name.into(), seconds);
        self
    }

    /// Add a flow definition file pattern.
    pub fn with_flow_file(mut self, pattern: impl Into<String>) -> Self {
        self.flow_files.push(pattern.into());
        self
    }
}

/// Parse `name=seconds,name=seconds`; malformed pairs are skipped.
fn parse_callbacks(raw: &str) -> BTreeMap<String, u64> {
    raw.split(',')
        .filter_map(|pair| {
            let (name, seconds) = pair.split_once('=')?;
            let seconds = seconds.trim().parse().ok()?;
            Some((name.trim().to_string(), seconds))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DialogConfig::default();
        assert_eq!(config.max_depth, 30);
        assert_eq!(config.history_limit, 20);
        assert_eq!(config.version, DEFAULT_VERSION);
        assert!(config.inactive_callbacks.is_empty());
    }

    #[test]
    fn test_builder_setters() {
        let config = DialogConfig::new()
            .with_version("2")
            .with_max_depth(5)
            .with_error_message("Sorry, something broke")
            .with_inactive_callback("nudge", 600)
            .with_flow_file("~/bots/*.yml");

        assert_eq!(config.version, "2");
        assert_eq!(config.max_depth, 5);
        assert_eq!(
            config.error_message_text.as_deref(),
            Some("Sorry, something broke")
        );
        assert_eq!(config.inactive_callbacks.get("nudge"), Some(&600));
        assert_eq!(config.flow_files, vec!["~/bots/*.yml".to_string()]);
    }

    #[test]
    fn test_parse_callbacks() {
        let parsed = parse_callbacks("nudge=60, bye = 3600,broken,bad=x");
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed.get("nudge"), Some(&60));
        assert_eq!(parsed.get("bye"), Some(&3600));
    }
}
