mod file_store;

pub use file_store::JsonFileStore;

use serde::{de::DeserializeOwned, Serialize};
use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};

use crate::error::StorageError;

/// Durable visitor identifier.
pub const VISITOR_ID_KEY: &str = "visitor_id";
/// Compact mirror of the live session.
pub const ACTIVE_TRACKER_KEY: &str = "active_tracker";
/// Last geolocation result plus the time it was cached.
pub const LOCATION_CACHE_KEY: &str = "ip_location_cache";

/// String key/value storage with the semantics of browser local storage.
///
/// Every call may fail (storage blocked, quota exceeded, disk errors); the
/// tracker degrades instead of propagating these failures to the host.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Reads and decodes a JSON value stored under `key`.
pub fn read_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, StorageError> {
    match store.get(key)? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|err| StorageError::Corrupt {
                key: key.to_string(),
                reason: err.to_string(),
            }),
        None => Ok(None),
    }
}

/// Encodes `value` as JSON and stores it under `key`.
pub fn write_json<T: Serialize>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), StorageError> {
    let serialized = serde_json::to_string(value)?;
    store.set(key, &serialized)
}

/// Process-local storage; contents vanish with the instance.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let guard = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(guard.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut guard = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        guard.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut guard = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        guard.remove(key);
        Ok(())
    }
}

/// Storage that refuses every operation, like local storage blocked by
/// privacy settings.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableStore;

impl UnavailableStore {
    fn refuse<T>() -> Result<T, StorageError> {
        Err(StorageError::Unavailable {
            reason: "storage access is blocked".into(),
        })
    }
}

impl KeyValueStore for UnavailableStore {
    fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
        Self::refuse()
    }

    fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
        Self::refuse()
    }

    fn remove(&self, _key: &str) -> Result<(), StorageError> {
        Self::refuse()
    }
}
