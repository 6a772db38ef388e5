//! Error types for dialog-core.

use thiserror::Error;

/// Result type alias using dialog-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while tracking context or resolving transitions.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed state, action or requirement definition
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Destination state does not exist
    #[error("Transition error: state {target} does not exist")]
    Transition { target: String },

    /// A user action failed while running
    #[error("Action {action} failed: {message}")]
    ActionRuntime {
        action: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Wrong value type assigned to an entity
    #[error("Value type error: {0}")]
    ValueType(String),

    /// Malformed test-recording command
    #[error("Recording protocol error: {0}")]
    RecordingProtocol(String),

    /// Action identifier was never registered
    #[error("Unregistered action: {id}")]
    UnregisteredAction { id: String },

    /// Query was built or combined incorrectly
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Intent or flow pattern failed to compile
    #[error("Invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// Key/value store failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Scheduling capability failure
    #[error("Scheduling error: {0}")]
    Scheduling(String),

    /// Channel adapter failure
    #[error("Channel error: {0}")]
    Channel(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Flow definition document could not be parsed
    #[error("Definition error: {0}")]
    Definition(#[from] serde_yaml::Error),

    /// Filesystem error while loading definitions
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a transition error for a missing destination.
    pub fn transition(target: impl Into<String>) -> Self {
        Self::Transition {
            target: target.into(),
        }
    }

    /// Create an action runtime error.
    pub fn action_runtime(action: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ActionRuntime {
            action: action.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create an action runtime error with source.
    pub fn action_runtime_with_source(
        action: impl Into<String>,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::ActionRuntime {
            action: action.into(),
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a value type error.
    pub fn value_type(message: impl Into<String>) -> Self {
        Self::ValueType(message.into())
    }

    /// Create an unregistered action error.
    pub fn unregistered_action(id: impl Into<String>) -> Self {
        Self::UnregisteredAction { id: id.into() }
    }

    /// Create an invalid query error.
    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidQuery(message.into())
    }

    /// Create a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Whether the error signals a programming or configuration mistake
    /// rather than a recoverable runtime condition.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_)
                | Self::ValueType(_)
                | Self::UnregisteredAction { .. }
                | Self::InvalidPattern(_)
                | Self::Definition(_)
        )
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(err.to_string())
    }
}
