//! JSON file-based storage implementation.
//!
//! Each document is one file: `"versions"` -> `<base_dir>/versions.json`.
//! Writes go to a uniquely named temp file first and are renamed into
//! place, so readers never observe a half-written document.

use crate::{validate_name, DocumentStore, StorageError, StorageResult};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

/// JSON file-based document storage.
#[derive(Clone)]
pub struct JsonFileStore {
    base_dir: PathBuf,
    update_lock: Arc<Mutex<()>>,
    temp_counter: Arc<AtomicU64>,
}

impl JsonFileStore {
    /// Create a new JSON store rooted at `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            update_lock: Arc::new(Mutex::new(())),
            temp_counter: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Directory holding the documents.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Get the file path for a document.
    pub fn document_path(&self, name: &str) -> StorageResult<PathBuf> {
        validate_name(name)?;
        Ok(self.base_dir.join(format!("{name}.json")))
    }

    async fn write_atomic(&self, path: &Path, content: &str) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let seq = self.temp_counter.fetch_add(1, Ordering::Relaxed);
        let temp_path = path.with_extension(format!("json.{}.{}.tmp", std::process::id(), seq));

        fs::write(&temp_path, content).await?;
        if let Err(e) = fs::rename(&temp_path, path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StorageError::Io(e));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for JsonFileStore {
    async fn read<T: DeserializeOwned + Send>(&self, name: &str) -> StorageResult<Option<T>> {
        let path = self.document_path(name)?;
        debug!(path = %path.display(), "Reading document");

        match fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn write<T: Serialize + Send + Sync>(&self, name: &str, value: &T) -> StorageResult<()> {
        let path = self.document_path(name)?;
        debug!(path = %path.display(), "Writing document");

        let content = serde_json::to_string_pretty(value)?;
        self.write_atomic(&path, &content).await
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
        let path = self.document_path(name)?;
        debug!(path = %path.display(), "Removing document");

        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn exists(&self, name: &str) -> StorageResult<bool> {
        let path = self.document_path(name)?;
        Ok(fs::try_exists(&path).await?)
    }
}
