//! Version ledger: one record per mutating action, newest first.
//!
//! The ledger is persisted as a single document `{ "versions": [...] }`
//! behind the [`LedgerStore`] trait. Recording a version may back up file
//! bytes first; retention evicts the oldest versions together with their
//! backup directories.

use crate::backup::BackupStore;
use crate::cache::TtlCache;
use crate::names::NameStore;
use crate::snapshot::SnapshotBuilder;
use crate::tree::{BackupRecord, DirectoryNode, TreeSnapshot};
use crate::version::{Action, ChangeDetails, Version, VersionId, VersionPage, VersionSnapshot};
use crate::{HistoryError, HistoryResult};
use async_trait::async_trait;
use chrono::Duration;
use protoshelf_storage::DocumentStore;
use protoshelf_util::{SharedClock, TimestampIds};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Default number of versions kept.
pub const DEFAULT_MAX_VERSIONS: usize = 100;

/// Durable home of the version list.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// All versions, newest first.
    async fn load(&self) -> HistoryResult<Vec<Version>>;

    /// Prepend `version`, keep at most `retention` entries, and return the
    /// entries that fell off the end.
    async fn append(&self, version: Version, retention: usize) -> HistoryResult<Vec<Version>>;

    /// Drop every version and return what was removed.
    async fn clear(&self) -> HistoryResult<Vec<Version>>;
}

/// The persisted ledger document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerDocument {
    #[serde(default)]
    pub versions: Vec<Version>,
}

/// [`LedgerStore`] backed by one document in a [`DocumentStore`].
pub struct DocumentLedger<S> {
    store: Arc<S>,
    document: String,
}

impl<S: DocumentStore> DocumentLedger<S> {
    pub fn new(store: Arc<S>, document: impl Into<String>) -> Self {
        Self {
            store,
            document: document.into(),
        }
    }
}

#[async_trait]
impl<S: DocumentStore + 'static> LedgerStore for DocumentLedger<S> {
    async fn load(&self) -> HistoryResult<Vec<Version>> {
        let doc: Option<LedgerDocument> = self.store.read(&self.document).await?;
        Ok(doc.map(|d| d.versions).unwrap_or_default())
    }

    async fn append(&self, version: Version, retention: usize) -> HistoryResult<Vec<Version>> {
        let mut evicted = Vec::new();
        self.store
            .update(&self.document, |doc: &mut LedgerDocument| {
                doc.versions.insert(0, version);
                if doc.versions.len() > retention {
                    evicted = doc.versions.split_off(retention);
                }
            })
            .await?;
        Ok(evicted)
    }

    async fn clear(&self) -> HistoryResult<Vec<Version>> {
        let mut removed = Vec::new();
        self.store
            .update(&self.document, |doc: &mut LedgerDocument| {
                removed = std::mem::take(&mut doc.versions);
            })
            .await?;
        Ok(removed)
    }
}

/// Tunables for a [`Ledger`].
#[derive(Debug, Clone)]
pub struct LedgerSettings {
    pub max_versions: usize,
    /// How long a loaded ledger is reused before re-reading storage.
    pub read_ttl: Duration,
    /// Shared secret required by [`Ledger::clear`]. `None` disables clearing.
    pub clear_secret: Option<String>,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            max_versions: DEFAULT_MAX_VERSIONS,
            read_ttl: Duration::seconds(10),
            clear_secret: None,
        }
    }
}

/// Records versions and answers history queries.
pub struct Ledger<S> {
    store: Arc<dyn LedgerStore>,
    snapshots: SnapshotBuilder,
    backups: BackupStore,
    names: NameStore<S>,
    ids: TimestampIds,
    clock: SharedClock,
    cache: TtlCache<(), Arc<Vec<Version>>>,
    write_lock: Mutex<()>,
    settings: LedgerSettings,
}

impl<S: DocumentStore + 'static> Ledger<S> {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        snapshots: SnapshotBuilder,
        backups: BackupStore,
        names: NameStore<S>,
        clock: SharedClock,
        settings: LedgerSettings,
    ) -> Self {
        Self {
            store,
            snapshots,
            backups,
            names,
            ids: TimestampIds::new(),
            cache: TtlCache::new(settings.read_ttl, Arc::clone(&clock)),
            clock,
            write_lock: Mutex::new(()),
            settings,
        }
    }

    pub fn snapshots(&self) -> &SnapshotBuilder {
        &self.snapshots
    }

    pub fn backups(&self) -> &BackupStore {
        &self.backups
    }

    pub fn names(&self) -> &NameStore<S> {
        &self.names
    }

    /// All versions, newest first. Served from a short-lived cache.
    pub async fn versions(&self) -> HistoryResult<Arc<Vec<Version>>> {
        if let Some(cached) = self.cache.get(&()) {
            return Ok(cached);
        }
        let versions = Arc::new(self.store.load().await?);
        self.cache.insert((), Arc::clone(&versions));
        Ok(versions)
    }

    /// Look up one version.
    pub async fn get(&self, id: VersionId) -> HistoryResult<Version> {
        self.versions()
            .await?
            .iter()
            .find(|v| v.id == id)
            .cloned()
            .ok_or(HistoryError::NotFound(id))
    }

    /// The `limit` most recent versions without their snapshots.
    pub async fn list(&self, limit: usize) -> HistoryResult<VersionPage> {
        let versions = self.versions().await?;
        Ok(VersionPage {
            versions: versions.iter().take(limit).map(Version::summary).collect(),
            total: versions.len(),
            has_more: versions.len() > limit,
        })
    }

    /// Record a mutating action.
    ///
    /// For `Delete`, call this *before* removing the target: its subtree is
    /// captured and backed up here. For uploads, `details.files` are backed
    /// up individually and the whole target directory is backed up as well.
    pub async fn record_change(
        &self,
        action: Action,
        details: ChangeDetails,
    ) -> HistoryResult<Version> {
        let _guard = self.write_lock.lock().await;
        let id = self.next_id().await?;

        let mut directory_snapshot = None;
        let mut backed_files = Vec::new();

        let prepared = match action {
            Action::Delete => {
                self.prepare_delete(&details, id, &mut directory_snapshot, &mut backed_files)
                    .await
            }
            action if action.is_upload() => {
                self.prepare_upload(&details, id, &mut backed_files).await
            }
            _ => Ok(()),
        };
        if let Err(e) = prepared {
            self.backups.evict(id).await;
            return Err(e);
        }

        let file_system = match self.capture_live().await {
            Ok(tree) => tree,
            Err(e) => {
                self.backups.evict(id).await;
                return Err(e);
            }
        };

        let version = Version {
            id,
            timestamp: self.clock.now(),
            action,
            details,
            snapshot: VersionSnapshot {
                file_system: Some(file_system),
                custom_names: None,
                directory_snapshot,
                backed_files,
                version_id: id,
            },
        };

        self.persist(version).await
    }

    /// Record a deletion whose subtree the caller already captured.
    ///
    /// Unlike [`record_change`](Self::record_change) with `Action::Delete`,
    /// this version carries only the display names and the pre-delete
    /// subtree. It has no full-tree snapshot and so cannot be restored.
    pub async fn record_deletion(
        &self,
        details: ChangeDetails,
        directory_snapshot: DirectoryNode,
    ) -> HistoryResult<Version> {
        let _guard = self.write_lock.lock().await;
        let id = self.next_id().await?;
        let custom_names = self.names.load().await?;

        let version = Version {
            id,
            timestamp: self.clock.now(),
            action: Action::Delete,
            details,
            snapshot: VersionSnapshot {
                file_system: None,
                custom_names: Some(custom_names),
                directory_snapshot: Some(directory_snapshot),
                backed_files: Vec::new(),
                version_id: id,
            },
        };

        self.persist(version).await
    }

    /// Wipe the ledger and all backups if `credential` matches the secret.
    pub async fn clear(&self, credential: &str) -> HistoryResult<usize> {
        match &self.settings.clear_secret {
            Some(secret) if secret == credential => {}
            _ => {
                warn!("Rejected ledger clear with bad credential");
                return Err(HistoryError::Auth);
            }
        }

        let _guard = self.write_lock.lock().await;
        let removed = self.store.clear().await?;
        self.cache.invalidate(&());

        for version in &removed {
            self.backups.evict(version.id).await;
        }

        info!(removed = removed.len(), "Cleared version ledger");
        Ok(removed.len())
    }

    async fn next_id(&self) -> HistoryResult<VersionId> {
        if let Some(latest) = self.versions().await?.iter().map(|v| v.id).max() {
            self.ids.observe(latest.as_i64());
        }
        Ok(VersionId(self.ids.next(self.clock.now())))
    }

    async fn capture_live(&self) -> HistoryResult<TreeSnapshot> {
        let names = self.names.load().await?;
        self.snapshots.capture_full(names).await
    }

    async fn prepare_delete(
        &self,
        details: &ChangeDetails,
        id: VersionId,
        directory_snapshot: &mut Option<DirectoryNode>,
        backed_files: &mut Vec<BackupRecord>,
    ) -> HistoryResult<()> {
        let Some(path) = details.path.as_deref() else {
            return Ok(());
        };
        let absolute = self.snapshots.resolve(Path::new(path))?;

        match tokio::fs::metadata(&absolute).await {
            Ok(meta) if meta.is_dir() => {
                *directory_snapshot = Some(self.snapshots.capture_subtree(&absolute).await?);
                backed_files.extend(self.backups.backup_tree(&absolute, id).await?);
            }
            Ok(_) => {
                if let Some(record) = self.backups.backup_file(&absolute, id, None).await? {
                    backed_files.push(record);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path, "Delete target already gone, nothing to back up");
            }
            Err(e) => return Err(HistoryError::io_at(absolute, e)),
        }
        Ok(())
    }

    async fn prepare_upload(
        &self,
        details: &ChangeDetails,
        id: VersionId,
        backed_files: &mut Vec<BackupRecord>,
    ) -> HistoryResult<()> {
        if details.files.is_empty() {
            return Ok(());
        }

        for file in &details.files {
            let absolute = self.snapshots.resolve(Path::new(&file.path))?;
            match self
                .backups
                .backup_file(&absolute, id, file.original_relative_path.clone())
                .await
            {
                Ok(Some(record)) => backed_files.push(record),
                Ok(None) => debug!(path = %file.path, "Uploaded file not present, skipping"),
                Err(e) => {
                    warn!(version_id = %id, path = %file.path, error = %e, "Failed to back up uploaded file");
                }
            }
        }

        if let Some(directory) = details.path.as_deref() {
            let absolute = self.snapshots.resolve(Path::new(directory))?;
            if absolute.is_dir() {
                let explicit: HashSet<String> =
                    backed_files.iter().map(|r| r.relative_path.clone()).collect();
                let rest = self.backups.backup_tree(&absolute, id).await?;
                backed_files.extend(
                    rest.into_iter()
                        .filter(|r| !explicit.contains(&r.relative_path)),
                );
            }
        }
        Ok(())
    }

    async fn persist(&self, version: Version) -> HistoryResult<Version> {
        let id = version.id;
        let result = self
            .store
            .append(version.clone(), self.settings.max_versions)
            .await;
        self.cache.invalidate(&());

        let evicted = match result {
            Ok(evicted) => evicted,
            Err(e) => {
                self.backups.evict(id).await;
                return Err(e);
            }
        };

        for old in &evicted {
            self.backups.evict(old.id).await;
        }
        if !evicted.is_empty() {
            info!(evicted = evicted.len(), "Applied version retention");
        }

        info!(
            version_id = %id,
            action = %version.action,
            backed_files = version.snapshot.backed_files.len(),
            "Recorded version"
        );
        Ok(version)
    }
}
