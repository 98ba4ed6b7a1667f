use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use snafu::ensure;

use super::LocalStorage;
use super::error::{EmptyKeySnafu, InvariantViolationSnafu, StorageResult};

/// Process-local storage; contents vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn len(&self) -> usize {
        self.entries().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entries(&self) -> StorageResult<MutexGuard<'_, HashMap<String, String>>> {
        match self.entries.lock() {
            Ok(entries) => Ok(entries),
            Err(_) => InvariantViolationSnafu {
                stage: "memory-lock",
                details: "memory storage mutex poisoned".to_string(),
            }
            .fail(),
        }
    }
}

impl LocalStorage for MemoryStorage {
    fn get_item(&self, key: &str) -> StorageResult<Option<String>> {
        ensure!(!key.is_empty(), EmptyKeySnafu { stage: "memory-get" });
        Ok(self.entries()?.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> StorageResult<()> {
        ensure!(!key.is_empty(), EmptyKeySnafu { stage: "memory-set" });
        self.entries()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> StorageResult<()> {
        ensure!(!key.is_empty(), EmptyKeySnafu { stage: "memory-remove" });
        self.entries()?.remove(key);
        Ok(())
    }
}
