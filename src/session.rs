//! Opaque per-connection session storage.

use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// A key/value store attached to every connection.
///
/// The engine never looks inside: values are application state keyed by
/// string, shareable across the handler callbacks and any thread holding the
/// connection.
#[derive(Default)]
pub struct SessionStorage {
    map: Mutex<HashMap<String, Arc<dyn Any + Send + Sync>>>,
}

impl std::fmt::Debug for SessionStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStorage").field("len", &self.len()).finish()
    }
}

impl SessionStorage {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Store a value, replacing any previous value under the key.
    pub fn insert(&self, key: impl Into<String>, value: Arc<dyn Any + Send + Sync>) {
        self.map.lock().insert(key.into(), value);
    }

    /// Fetch the value under `key`, if any.
    pub fn get(&self, key: &str) -> Option<Arc<dyn Any + Send + Sync>> {
        self.map.lock().get(key).cloned()
    }

    /// Remove and return the value under `key`.
    pub fn remove(&self, key: &str) -> Option<Arc<dyn Any + Send + Sync>> {
        self.map.lock().remove(key)
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.map.lock().len()
    }

    /// Whether the storage holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
