//! SQLite-backed session store.

use super::schema::{initialize_schema, is_initialized};
use super::KeyValueStore;
use crate::error::{Error, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// SQLite-backed key/value store.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;

        if !is_initialized(&conn) {
            initialize_schema(&conn)?;
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| Error::Internal(format!("Failed to lock connection: {}", e)))?;
        f(&conn).map_err(|e| Error::storage(e.to_string()))
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()
        })
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE
                 SET value = excluded.value, updated_at = datetime('now')",
                params![key, value],
            )?;
            Ok(())
        })
    }

    fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT value FROM hash_fields WHERE key = ?1 AND field = ?2",
                params![key, field],
                |row| row.get(0),
            )
            .optional()
        })
    }

    fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO hash_fields (key, field, value) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key, field) DO UPDATE
                 SET value = excluded.value, updated_at = datetime('now')",
                params![key, field, value],
            )?;
            Ok(())
        })
    }

    fn hash_delete(&self, key: &str, field: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM hash_fields WHERE key = ?1 AND field = ?2",
                params![key, field],
            )?;
            Ok(deleted > 0)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_and_hashes() {
        let store = SqliteStore::in_memory().unwrap();
        assert_eq!(store.get("dialog_version").unwrap(), None);

        store.set("dialog_version", "1").unwrap();
        store.set("dialog_version", "2").unwrap();
        assert_eq!(store.get("dialog_version").unwrap().as_deref(), Some("2"));

        store.hash_set("session_state", "chat", "default.root").unwrap();
        store.hash_set("session_state", "chat", "shop.root").unwrap();
        assert_eq!(
            store.hash_get("session_state", "chat").unwrap().as_deref(),
            Some("shop.root")
        );
        assert!(store.hash_exists("session_state", "chat").unwrap());
        assert!(store.hash_delete("session_state", "chat").unwrap());
        assert!(!store.hash_delete("session_state", "chat").unwrap());
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.hash_set("session_context", "chat", "{}").unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(
            store.hash_get("session_context", "chat").unwrap().as_deref(),
            Some("{}")
        );
    }
}
