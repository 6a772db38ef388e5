//! Conversation test recorder.
//!
//! Sending `/test_record/start` (the `test_record` entity with value
//! `start`) begins capturing user messages, bot responses and state
//! changes; `/test_record/stop` ends it. The captured events can be turned
//! into a regression test by the host.

use crate::dialog::MessageType;
use crate::response::Response;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};

/// Hint sent for malformed recording commands.
pub const RECORDING_USAGE: &str = "Use /test_record/start/ or /test_record/stop/";

/// One captured event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RecordedEvent {
    UserMessage {
        message_type: MessageType,
        entities: Map<String, Value>,
    },
    BotMessage {
        response: Response,
    },
    StateChange {
        state: String,
    },
}

/// Shared buffer of recorded events. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct ConversationRecorder {
    events: Arc<Mutex<Vec<RecordedEvent>>>,
}

impl ConversationRecorder {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new recording, discarding the previous one.
    pub fn start(&self) -> Response {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
        tracing::info!("Started recording conversation test");
        Response::text("Recording started. Send /test_record/stop/ when done.")
    }

    /// Stop recording and summarize what was captured.
    pub fn stop(&self) -> Response {
        let count = self.len();
        tracing::info!(events = count, "Stopped recording conversation test");
        Response::text(format!("Recording stopped, captured {count} events."))
    }

    pub fn record_user_message(&self, message_type: MessageType, entities: &Map<String, Value>) {
        self.push(RecordedEvent::UserMessage {
            message_type,
            entities: entities.clone(),
        });
    }

    pub fn record_bot_message(&self, response: &Response) {
        self.push(RecordedEvent::BotMessage {
            response: response.clone(),
        });
    }

    pub fn record_state_change(&self, state: &str) {
        self.push(RecordedEvent::StateChange {
            state: state.to_string(),
        });
    }

    fn push(&self, event: RecordedEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(e) => tracing::warn!("Failed to lock recorder: {}", e),
        }
    }

    /// Captured events, oldest first.
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Number of captured events.
    pub fn len(&self) -> usize {
        self.events.lock().map(|e| e.len()).unwrap_or(0)
    }

    /// Whether nothing was captured.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
