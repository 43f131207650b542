//! In-memory storage backend.
//!
//! Used for `memory://` roots and in tests to avoid file I/O.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::Storage;
use crate::error::{Error, Result};

/// Thread-safe in-memory storage. Clones share the same contents.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    data: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.data.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Pre-populate data for a path (used by tests)
    pub fn insert(&self, path: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.lock().insert(path.into(), bytes.into());
    }

    pub fn contains(&self, path: &str) -> bool {
        self.lock().contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl Storage for MemoryStorage {
    fn write(&self, path: &str, bytes: &[u8]) -> Result<()> {
        self.lock().insert(path.to_string(), bytes.to_vec());
        Ok(())
    }

    fn read(&self, path: &str) -> Result<Vec<u8>> {
        self.lock()
            .get(path)
            .cloned()
            .ok_or_else(|| Error::NotFound(path.to_string()))
    }

    fn delete(&self, path: &str) -> Result<()> {
        let dir = format!("{}/", path.trim_end_matches('/'));
        self.lock()
            .retain(|k, _| k.as_str() != path && !k.starts_with(&dir));
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        let mut data = self.lock();
        let bytes = data
            .remove(from)
            .ok_or_else(|| Error::NotFound(from.to_string()))?;
        data.insert(to.to_string(), bytes);
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .lock()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}
