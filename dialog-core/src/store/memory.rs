//! In-process store.

use super::KeyValueStore;
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Tables {
    keys: HashMap<String, String>,
    hashes: HashMap<String, HashMap<String, String>>,
}

/// Store backed by process memory. Contents are lost on exit.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|e| Error::Internal(format!("Failed to lock store: {}", e)))
    }
}

impl KeyValueStore for InMemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.tables()?.keys.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.tables()?.keys.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>> {
        Ok(self
            .tables()?
            .hashes
            .get(key)
            .and_then(|hash| hash.get(field))
            .cloned())
    }

    fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<()> {
        self.tables()?
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    fn hash_delete(&self, key: &str, field: &str) -> Result<bool> {
        Ok(self
            .tables()?
            .hashes
            .get_mut(key)
            .is_some_and(|hash| hash.remove(field).is_some()))
    }
}
