//! Conversation logging collaborator.

use crate::dialog::{ChatSession, MessageType};
use crate::response::Response;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// Receives every user and bot message for analytics.
pub trait MessageLogger: Send + Sync {
    /// A new session was created.
    fn log_user(&self, session: &ChatSession);

    /// A user message finished processing.
    fn log_user_message(
        &self,
        session: &ChatSession,
        message_type: MessageType,
        entities: &Map<String, Value>,
        accepted_at: DateTime<Utc>,
        accepted_state: &str,
    );

    /// The bot sent a response while in `state`.
    fn log_bot_message(&self, session: &ChatSession, response: &Response, state: &str);
}

/// Logs messages as structured `tracing` events when enabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMessageLogger {
    enabled: bool,
}

impl TracingMessageLogger {
    /// Create a logger; a disabled logger drops everything.
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Whether messages are logged.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl MessageLogger for TracingMessageLogger {
    fn log_user(&self, session: &ChatSession) {
        if !self.enabled {
            return;
        }
        tracing::info!(
            target: "dialog_core::messages",
            chat_id = %session.chat_id,
            is_test = session.is_test,
            "New user"
        );
    }

    fn log_user_message(
        &self,
        session: &ChatSession,
        message_type: MessageType,
        entities: &Map<String, Value>,
        accepted_at: DateTime<Utc>,
        accepted_state: &str,
    ) {
        if !self.enabled {
            return;
        }
        let text = entities
            .get("_message_text")
            .and_then(|spec| spec.get("value").or(Some(spec)))
            .and_then(Value::as_str)
            .unwrap_or_default();
        let elapsed_ms = (Utc::now() - accepted_at).num_milliseconds();
        let names: Vec<&str> = entities.keys().map(String::as_str).collect();
        tracing::info!(
            target: "dialog_core::messages",
            chat_id = %session.chat_id,
            message_type = ?message_type,
            state = accepted_state,
            entities = ?names,
            elapsed_ms,
            "User: {text}"
        );
    }

    fn log_bot_message(&self, session: &ChatSession, response: &Response, state: &str) {
        if !self.enabled {
            return;
        }
        tracing::info!(
            target: "dialog_core::messages",
            chat_id = %session.chat_id,
            state,
            response = ?response,
            "Bot message"
        );
    }
}
