//! In-memory storage implementation for testing.

use crate::{validate_name, DocumentStore, StorageError, StorageResult};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::Mutex;

/// In-memory document storage.
///
/// Documents are kept as serialized JSON so the same serde round trip as
/// the file backend is exercised. Nothing is persisted.
pub struct MemoryStore {
    data: RwLock<HashMap<String, String>>,
    update_lock: Mutex<()>,
}

impl MemoryStore {
    /// Create a new in-memory store.
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
            update_lock: Mutex::new(()),
        }
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.data.read().map(|d| d.len()).unwrap_or(0)
    }

    /// Whether the store holds no documents.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn read<T: DeserializeOwned + Send>(&self, name: &str) -> StorageResult<Option<T>> {
        validate_name(name)?;
        let data = self
            .data
            .read()
            .map_err(|e| StorageError::LockPoisoned(e.to_string()))?;

        match data.get(name) {
            Some(json) => Ok(Some(serde_json::from_str(json)?)),
            None => Ok(None),
        }
    }

    async fn write<T: Serialize + Send + Sync>(&self, name: &str, value: &T) -> StorageResult<()> {
        validate_name(name)?;
        let json = serde_json::to_string(value)?;

        let mut data = self
            .data
            .write()
            .map_err(|e| StorageError::LockPoisoned(e.to_string()))?;
        data.insert(name.to_string(), json);

        Ok(())
    }

    async fn update<T, F>(&self, name: &str, editor: F) -> StorageResult<T>
    where
        T: DeserializeOwned + Serialize + Send + Sync + Default,
        F: FnOnce(&mut T) + Send,
    {
        let _guard = self.update_lock.lock().await;
        let mut value: T = self.read(name).await?.unwrap_or_default();
        editor(&mut value);
        self.write(name, &value).await?;
        Ok(value)
    }

    async fn remove(&self, name: &str) -> StorageResult<()> {
        validate_name(name)?;
        let mut data = self
            .data
            .write()
            .map_err(|e| StorageError::LockPoisoned(e.to_string()))?;
        data.remove(name);
        Ok(())
    }

    async fn exists(&self, name: &str) -> StorageResult<bool> {
        validate_name(name)?;
        let data = self
            .data
            .read()
            .map_err(|e| StorageError::LockPoisoned(e.to_string()))?;
        Ok(data.contains_key(name))
    }
}
