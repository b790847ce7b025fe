//! Version history for trees of static demo sites.
//!
//! Every mutating action on the project root (create, rename, delete,
//! upload, reupload) is recorded as a [`Version`] carrying a full snapshot
//! of the directory tree plus raw backups of the files it touched. Any
//! recorded version can later be restored: the live tree is diffed against
//! the snapshot and reconciled, best-effort.
//!
//! # Example
//!
//! ```no_run
//! use protoshelf_history::{HistoryConfig, UploadFile, Workspace};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (config, _sources) = HistoryConfig::load(std::path::Path::new("/srv/demos")).await?;
//! let workspace = Workspace::open(config).await?;
//!
//! let upload = workspace
//!     .upload("landing", vec![UploadFile::new("index.html", "<h1>hi</h1>")])
//!     .await?;
//! workspace.delete("landing").await?;
//!
//! // Bring it back
//! let report = workspace.restore(upload.id).await?;
//! println!("{:?}", report.restored);
//! # Ok(())
//! # }
//! ```

pub mod backup;
pub mod cache;
pub mod config;
mod error;
pub mod ignore;
pub mod ledger;
pub mod names;
pub mod restore;
pub mod snapshot;
pub mod tree;
pub mod version;
pub mod workspace;

pub use backup::BackupStore;
pub use cache::{ChildEntry, MetadataCache, TtlCache};
pub use config::{ConfigFile, HistoryConfig};
pub use error::{HistoryError, HistoryResult};
pub use ignore::{IgnoreConfig, IgnoreRules};
pub use ledger::{DocumentLedger, Ledger, LedgerSettings, LedgerStore};
pub use names::{CustomNames, NameStore};
pub use restore::{RestoreEngine, RestoreReport};
pub use snapshot::SnapshotBuilder;
pub use tree::{BackupRecord, DirectoryNode, FileRecord, TreeSnapshot};
pub use version::{
    Action, ChangeDetails, UploadedFile, Version, VersionId, VersionPage, VersionSnapshot,
    VersionSummary,
};
pub use workspace::{UploadFile, Workspace};
