//! History error types.

use crate::VersionId;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for history operations.
pub type HistoryResult<T> = Result<T, HistoryError>;

/// Errors that can occur while recording or restoring versions.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// No version with this id is in the ledger.
    #[error("Version not found: {0}")]
    NotFound(VersionId),

    /// The version exists but cannot be used for the requested operation.
    #[error("Invalid version state: {0}")]
    InvalidState(String),

    /// The credential supplied to clear the ledger did not match.
    #[error("Authentication failed")]
    Auth,

    /// A path resolved outside the project root.
    #[error("Path escapes project root: {0}")]
    OutsideRoot(PathBuf),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// IO error tied to a specific path.
    #[error("IO error at {path}: {source}")]
    IoAt {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Ledger or sidecar persistence failed.
    #[error("Storage error: {0}")]
    Storage(#[from] protoshelf_storage::StorageError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration could not be loaded.
    #[error("Config error: {0}")]
    Config(String),
}

impl HistoryError {
    /// Create an invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    /// Attach a path to an IO error.
    pub fn io_at(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::IoAt {
            path: path.into(),
            source,
        }
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
