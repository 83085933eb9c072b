use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    path::PathBuf,
    sync::{PoisonError, RwLock},
};

use crate::error::StorageError;

use super::KeyValueStore;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct StoredEntries {
    entries: BTreeMap<String, String>,
}

/// Key/value storage persisted as one JSON document.
///
/// Every mutation is written through, so the file always mirrors memory.
pub struct JsonFileStore {
    path: PathBuf,
    data: RwLock<StoredEntries>,
}

impl JsonFileStore {
    /// Opens `path`, starting empty when the file is missing or unreadable
    /// as JSON.
    pub fn new(path: PathBuf) -> Result<Self, StorageError> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)?;
            match serde_json::from_str(&contents) {
                Ok(data) => data,
                Err(err) => {
                    log::warn!(
                        "Ignoring corrupt tracker storage at {}: {}",
                        path.display(),
                        err
                    );
                    StoredEntries::default()
                }
            }
        } else {
            StoredEntries::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &std::path::Path {
        self.path.as_path()
    }

    fn persist(&self, data: &StoredEntries) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)?;
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let guard = self.data.read().unwrap_or_else(PoisonError::into_inner);
        Ok(guard.entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
        guard.entries.insert(key.to_string(), value.to_string());
        self.persist(&guard)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
        if guard.entries.remove(key).is_some() {
            self.persist(&guard)?;
        }
        Ok(())
    }
}
