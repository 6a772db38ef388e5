//! Persistent key/value storage for sessions.
//!
//! The dialog manager only needs plain keys and hashes (key -> field ->
//! value) with atomic per-key reads and writes. Two adapters ship with the
//! crate: [`InMemoryStore`] for tests and single-process hosts, and
//! [`SqliteStore`] for durable storage.

mod memory;
mod schema;
mod sqlite;

pub use memory::InMemoryStore;
pub use schema::{get_schema_version, initialize_schema, is_initialized, SCHEMA_VERSION};
pub use sqlite::SqliteStore;

use crate::error::Result;

/// Global compatibility tag.
pub const VERSION_KEY: &str = "dialog_version";
/// Hash: chat id -> current state name.
pub const SESSION_STATE: &str = "session_state";
/// Hash: chat id -> serialized context.
pub const SESSION_CONTEXT: &str = "session_context";
/// Hash: chat id -> channel adapter name.
pub const SESSION_INTERFACE: &str = "session_interface";
/// Hash: chat id -> last activity time.
pub const SESSION_ACTIVE: &str = "session_active";
/// Hash: chat id -> serialized chat session.
pub const CHAT_SESSION: &str = "chat_session";

/// Opaque key/value capability.
pub trait KeyValueStore: Send + Sync {
    /// Read a plain key.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a plain key.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Read one field of a hash.
    fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>>;

    /// Write one field of a hash.
    fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<()>;

    /// Delete one field of a hash. Returns whether it existed.
    fn hash_delete(&self, key: &str, field: &str) -> Result<bool>;

    /// Whether a hash field exists.
    fn hash_exists(&self, key: &str, field: &str) -> Result<bool> {
        Ok(self.hash_get(key, field)?.is_some())
    }
}
