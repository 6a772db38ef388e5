//! Chat sessions and inbound message kinds.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Identity of one conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSession {
    /// Unique chat identifier
    pub chat_id: String,
    /// Running under a test harness; action failures are re-raised
    #[serde(default)]
    pub is_test: bool,
    /// Free-form session metadata (user profile, locale, ...)
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub meta: Map<String, Value>,
}

impl ChatSession {
    /// Create a session for a known chat.
    pub fn new(chat_id: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            is_test: false,
            meta: Map::new(),
        }
    }

    /// Create a session with a fresh random chat id.
    pub fn ephemeral() -> Self {
        Self::new(Uuid::new_v4().to_string())
    }

    /// Mark the session as running under a test harness.
    pub fn with_test(mut self, is_test: bool) -> Self {
        self.is_test = is_test;
        self
    }

    /// Attach a metadata entry.
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }
}

/// Kind of an inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Free-form user message
    Message,
    /// Button press
    Postback,
    /// Scheduled or inactivity callback
    Schedule,
    /// Delivery receipt
    Delivery,
    /// Read receipt
    Read,
    /// Typing indicator
    Typing,
}

impl MessageType {
    /// Whether the event carries content the dialog should react to.
    pub fn is_content(self) -> bool {
        matches!(self, Self::Message | Self::Postback | Self::Schedule)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ephemeral_ids_are_unique() {
        let a = ChatSession::ephemeral();
        let b = ChatSession::ephemeral();
        assert_ne!(a.chat_id, b.chat_id);
        assert!(Uuid::parse_str(&a.chat_id).is_ok());
    }

    #[test]
    fn test_session_json() {
        let session = ChatSession::new("chat").with_meta("locale", "cs");
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json, json!({"chat_id": "chat", "is_test": false, "meta": {"locale": "cs"}}));

        let bare: ChatSession = serde_json::from_value(json!({"chat_id": "x"})).unwrap();
        assert_eq!(bare, ChatSession::new("x"));
    }

    #[test]
    fn test_content_types() {
        assert!(MessageType::Message.is_content());
        assert!(MessageType::Postback.is_content());
        assert!(MessageType::Schedule.is_content());
        assert!(!MessageType::Read.is_content());
        assert!(!MessageType::Typing.is_content());
    }
}
