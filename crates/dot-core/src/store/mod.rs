use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("store: key already exists: {0}")]
    KeyExists(String),
    #[error("store: key does not exist: {0}")]
    KeyNotFound(String),
}

/// Run-scoped, existence-checked key/value mapping.
///
/// Every operation takes the same lock, so callers never observe a partial update.
/// Cloning shares the underlying map.
#[derive(Clone)]
pub struct KeyValueStore<V = String> {
    inner: Arc<Mutex<HashMap<String, V>>>,
}

impl<V: Clone> KeyValueStore<V> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Insert `key`; fails with [`StoreError::KeyExists`] and keeps the old value if present.
    pub fn set(&self, key: impl Into<String>, value: V) -> Result<(), StoreError> {
        let key = key.into();
        let mut map = self.lock();
        if map.contains_key(&key) {
            return Err(StoreError::KeyExists(key));
        }
        map.insert(key, value);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<V, StoreError> {
        self.lock()
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::KeyNotFound(key.to_string()))
    }

    /// Overwrite an existing key.
    pub fn update(&self, key: &str, value: V) -> Result<(), StoreError> {
        match self.lock().get_mut(key) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(StoreError::KeyNotFound(key.to_string())),
        }
    }

    pub fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.lock()
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StoreError::KeyNotFound(key.to_string()))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // A panic while holding the lock cannot leave the map half-written
    // (every operation is a single map call), so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, V>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<V: Clone> Default for KeyValueStore<V> {
    fn default() -> Self {
        Self::new()
    }
}
