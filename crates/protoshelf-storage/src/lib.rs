//! Storage layer for protoshelf.
//!
//! Sidecar state (the version ledger, custom display names, the metadata
//! cache) is kept as whole JSON documents addressed by a short name. Two
//! backends are provided:
//! - JSON file storage (default), one `<name>.json` per document
//! - In-memory storage (for testing)

pub mod error;
pub mod json;
pub mod memory;

pub use error::{StorageError, StorageResult};
pub use json::JsonFileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

/// A trait for document storage backends.
///
/// Document names are single path-free tokens such as `"versions"`.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read a document.
    ///
    /// Returns `None` if the document doesn't exist.
    async fn read<T: DeserializeOwned + Send>(&self, name: &str) -> StorageResult<Option<T>>;

    /// Replace a document.
    async fn write<T: Serialize + Send + Sync>(&self, name: &str, value: &T) -> StorageResult<()>;

    /// Read-modify-write a document.
    ///
    /// The editor is called with the current value (or default if missing)
    /// and the result is written back. Concurrent `update` calls on the same
    /// store are serialised, so no edit is lost.
    async fn update<T, F>(&self, name: &str, editor: F) -> StorageResult<T>
    where
        T: DeserializeOwned + Serialize + Send + Sync + Default,
        F: FnOnce(&mut T) + Send;

    /// Remove a document. Removing a missing document is not an error.
    async fn remove(&self, name: &str) -> StorageResult<()>;

    /// Check if a document exists.
    async fn exists(&self, name: &str) -> StorageResult<bool>;
}

/// Validate a document name (no path traversal, no separators).
pub(crate) fn validate_name(name: &str) -> StorageResult<()> {
    if name.is_empty()
        || name.contains('/')
        || name.contains('\\')
        || name == "."
        || name == ".."
    {
        return Err(StorageError::invalid_name(name));
    }
    Ok(())
}
