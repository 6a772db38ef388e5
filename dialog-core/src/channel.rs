//! Channel adapters deliver responses and observe state changes.

use crate::dialog::ChatSession;
use crate::error::{Error, Result};
use crate::response::Response;
use std::sync::Mutex;

/// Message-delivery capability of one messaging platform.
pub trait ChannelAdapter: Send + Sync {
    /// Adapter identity, persisted with the session.
    fn name(&self) -> &str;

    /// Deliver one response to the user.
    fn post_message(&self, session: &ChatSession, response: &Response) -> Result<()>;

    /// Observe a state change.
    fn on_state_change(&self, _session: &ChatSession, _state: &str) -> Result<()> {
        Ok(())
    }

    /// Called when a message starts being processed, e.g. to show typing.
    fn processing_start(&self, _session: &ChatSession) -> Result<()> {
        Ok(())
    }

    /// Called when a message has been processed.
    fn processing_end(&self, _session: &ChatSession) -> Result<()> {
        Ok(())
    }
}

/// One event observed by a [`RecordingChannel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Posted { chat_id: String, response: Response },
    StateChanged { chat_id: String, state: String },
    ProcessingStarted { chat_id: String },
    ProcessingEnded { chat_id: String },
}

/// Channel that keeps everything it is asked to do, for tests and
/// headless hosts.
#[derive(Debug, Default)]
pub struct RecordingChannel {
    events: Mutex<Vec<ChannelEvent>>,
}

impl RecordingChannel {
    /// Create an empty channel.
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, event: ChannelEvent) -> Result<()> {
        self.events
            .lock()
            .map_err(|e| Error::Channel(format!("Failed to lock channel: {}", e)))?
            .push(event);
        Ok(())
    }

    /// All observed events, oldest first.
    pub fn events(&self) -> Vec<ChannelEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Posted responses, oldest first.
    pub fn messages(&self) -> Vec<Response> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ChannelEvent::Posted { response, .. } => Some(response),
                _ => None,
            })
            .collect()
    }

    /// Text of posted text responses, oldest first.
    pub fn texts(&self) -> Vec<String> {
        self.messages()
            .iter()
            .filter_map(|r| r.as_text().map(str::to_string))
            .collect()
    }

    /// States reported through [`ChannelAdapter::on_state_change`].
    pub fn state_changes(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ChannelEvent::StateChanged { state, .. } => Some(state),
                _ => None,
            })
            .collect()
    }

    /// Forget everything observed so far.
    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl ChannelAdapter for RecordingChannel {
    fn name(&self) -> &str {
        "recording"
    }

    fn post_message(&self, session: &ChatSession, response: &Response) -> Result<()> {
        self.push(ChannelEvent::Posted {
            chat_id: session.chat_id.clone(),
            response: response.clone(),
        })
    }

    fn on_state_change(&self, session: &ChatSession, state: &str) -> Result<()> {
        self.push(ChannelEvent::StateChanged {
            chat_id: session.chat_id.clone(),
            state: state.to_string(),
        })
    }

    fn processing_start(&self, session: &ChatSession) -> Result<()> {
        self.push(ChannelEvent::ProcessingStarted {
            chat_id: session.chat_id.clone(),
        })
    }

    fn processing_end(&self, session: &ChatSession) -> Result<()> {
        self.push(ChannelEvent::ProcessingEnded {
            chat_id: session.chat_id.clone(),
        })
    }
}
