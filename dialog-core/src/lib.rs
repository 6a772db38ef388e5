//! # dialog-core
//!
//! A dialogue-state engine for conversational agents.
//!
//! ## Core Components
//!
//! - **Context**: Per-session temporal entity memory and its query layer
//! - **Flow**: Declarative flows of states, requirements and actions
//! - **Dialog**: Transition resolution, action dispatch and persistence
//! - **Store**: Key/value persistence (in-memory and SQLite)
//!
//! ## Example
//!
//! ```rust,ignore
//! use dialog_core::{
//!     load_flow_files, ActionRegistry, ChatSession, DialogConfig, DialogManager, MessageType,
//! };
//! use std::sync::Arc;
//!
//! let config = DialogConfig::from_env();
//! let flows = Arc::new(load_flow_files(&config.flow_files, &ActionRegistry::new())?);
//! let mut dialog = DialogManager::builder(ChatSession::new("chat-1"), flows)
//!     .config(config)
//!     .build()?;
//!
//! let entities = serde_json::json!({"intent": "greeting"});
//! dialog.process(MessageType::Message, entities.as_object().cloned().unwrap_or_default())?;
//! ```

pub mod channel;
pub mod config;
pub mod context;
pub mod dialog;
pub mod error;
pub mod flow;
pub mod logging;
pub mod pattern;
pub mod recording;
pub mod response;
pub mod scheduler;
pub mod store;

// Re-exports for convenience
pub use channel::{ChannelAdapter, ChannelEvent, RecordingChannel};
pub use config::{DialogConfig, DEFAULT_VERSION};
pub use context::{
    Context, ContextDocument, EntityFilter, EntityQuery, EntityValue, StateVisit, TimeFilter,
};
pub use dialog::{ChatSession, DialogManager, DialogManagerBuilder, MessageType, MoveOptions};
pub use error::{Error, Result};
pub use flow::{
    build_flow_graph, load_flow_files, parse_flow_document, Action, ActionRegistry, ActionResult,
    Destination, Flow, FlowGraph, Requirement, State, GLOBAL_ROOT,
};
pub use logging::{MessageLogger, TracingMessageLogger};
pub use recording::{ConversationRecorder, RecordedEvent};
pub use response::Response;
pub use scheduler::{CallbackKind, CallbackTime, ManualScheduler, ScheduledCallback, Scheduler};
#[cfg(feature = "tokio-runtime")]
pub use scheduler::TokioScheduler;
pub use store::{InMemoryStore, KeyValueStore, SqliteStore};
