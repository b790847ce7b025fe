//! Operator actions over a project root.
//!
//! Every mutating action records a version through the ledger and
//! invalidates the metadata cache for the touched path and its parent.
//! Deletes are recorded before the filesystem removal so their bytes are
//! backed up while they still exist.

use crate::backup::BackupStore;
use crate::cache::{ChildEntry, MetadataCache};
use crate::config::HistoryConfig;
use crate::ledger::{DocumentLedger, Ledger};
use crate::names::NameStore;
use crate::restore::{RestoreEngine, RestoreReport};
use crate::snapshot::{join_relative, SnapshotBuilder};
use crate::version::{Action, ChangeDetails, UploadedFile, Version, VersionId, VersionPage};
use crate::{HistoryError, HistoryResult};
use protoshelf_storage::{DocumentStore, JsonFileStore};
use protoshelf_util::{path as paths, system_clock, SharedClock};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};

const NAMES_DOCUMENT: &str = "custom-names";
const CACHE_DOCUMENT: &str = "metadata-cache";

/// One file of an upload, relative to the target directory.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub path: String,
    pub contents: Vec<u8>,
}

impl UploadFile {
    pub fn new(path: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            contents: contents.into(),
        }
    }
}

/// A project root with history.
pub struct Workspace<S = JsonFileStore> {
    root: PathBuf,
    store: Arc<S>,
    ledger: Arc<Ledger<S>>,
    restorer: RestoreEngine<S>,
    cache: MetadataCache,
    names: NameStore<S>,
}

impl Workspace<JsonFileStore> {
    /// Open `config.project_root` with sidecars under `config.data_root()`.
    pub async fn open(config: HistoryConfig) -> HistoryResult<Self> {
        let config = config.with_absolute_root()?;
        let store = Arc::new(JsonFileStore::new(config.data_root()));
        Self::with_store(config, store, system_clock()).await
    }
}

impl<S: DocumentStore + 'static> Workspace<S> {
    pub async fn with_store(
        config: HistoryConfig,
        store: Arc<S>,
        clock: SharedClock,
    ) -> HistoryResult<Self> {
        let config = config.with_absolute_root()?;
        let root = config.project_root.clone();
        let meta = fs::metadata(&root)
            .await
            .map_err(|e| HistoryError::io_at(&root, e))?;
        if !meta.is_dir() {
            return Err(HistoryError::config(format!(
                "project root {} is not a directory",
                root.display()
            )));
        }

        let ignore = Arc::new(config.ignore_rules()?);
        let snapshots = SnapshotBuilder::new(
            &root,
            Arc::clone(&ignore),
            config.index_file.clone(),
            Arc::clone(&clock),
        );
        let backups = BackupStore::new(&root, config.backup_root(), ignore);
        let names = NameStore::new(Arc::clone(&store), NAMES_DOCUMENT);
        let ledger = Arc::new(Ledger::new(
            Arc::new(DocumentLedger::new(
                Arc::clone(&store),
                config.ledger_name.clone(),
            )),
            snapshots,
            backups,
            names.clone(),
            Arc::clone(&clock),
            config.ledger_settings(),
        ));

        let cache = MetadataCache::new(config.metadata_ttl(), clock);
        match cache.load_persisted(store.as_ref(), CACHE_DOCUMENT).await {
            Ok(count) => debug!(entries = count, "Loaded metadata cache"),
            Err(e) => warn!(error = %e, "Ignoring unreadable metadata cache"),
        }

        info!(root = %root.display(), "Opened workspace");

        Ok(Self {
            root,
            store,
            restorer: RestoreEngine::new(Arc::clone(&ledger)),
            ledger,
            cache,
            names,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ledger(&self) -> &Ledger<S> {
        &self.ledger
    }

    /// Create a directory (and missing parents).
    pub async fn create_dir(&self, path: &str) -> HistoryResult<Version> {
        let (absolute, relative) = self.locate(path)?;
        if fs::try_exists(&absolute).await.unwrap_or(false) {
            return Err(HistoryError::invalid_state(format!("{relative} already exists")));
        }
        fs::create_dir_all(&absolute)
            .await
            .map_err(|e| HistoryError::io_at(&absolute, e))?;

        let version = self
            .ledger
            .record_change(Action::Create, ChangeDetails::for_path(&relative))
            .await?;
        self.touched(&absolute);
        Ok(version)
    }

    /// Rename or move `from` to `to`. Display names move along.
    pub async fn rename(&self, from: &str, to: &str) -> HistoryResult<Version> {
        let (from_abs, from_rel) = self.locate_existing(from).await?;
        let (to_abs, to_rel) = self.locate(to)?;
        if from_rel.is_empty() || to_rel.is_empty() {
            return Err(HistoryError::invalid_state("cannot rename the project root"));
        }
        if fs::try_exists(&to_abs).await.unwrap_or(false) {
            return Err(HistoryError::invalid_state(format!("{to_rel} already exists")));
        }
        if let Some(parent) = to_abs.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| HistoryError::io_at(parent, e))?;
        }
        fs::rename(&from_abs, &to_abs)
            .await
            .map_err(|e| HistoryError::io_at(&from_abs, e))?;
        self.names.rename_prefix(&from_rel, &to_rel).await?;

        let version = self
            .ledger
            .record_change(Action::Rename, ChangeDetails::renamed(&from_rel, &to_rel))
            .await?;
        self.touched(&from_abs);
        self.touched(&to_abs);
        Ok(version)
    }

    /// Delete a file or directory. The version is recorded first.
    pub async fn delete(&self, path: &str) -> HistoryResult<Version> {
        let (absolute, relative) = self.locate_existing(path).await?;
        if relative.is_empty() {
            return Err(HistoryError::invalid_state("cannot delete the project root"));
        }

        let version = self
            .ledger
            .record_change(Action::Delete, ChangeDetails::for_path(&relative))
            .await?;

        let removed = if absolute.is_dir() {
            fs::remove_dir_all(&absolute).await
        } else {
            fs::remove_file(&absolute).await
        };
        removed.map_err(|e| HistoryError::io_at(&absolute, e))?;
        self.names.remove_tree(&relative).await?;

        self.touched(&absolute);
        Ok(version)
    }

    /// Write `files` into `directory` (created if needed) and record them.
    pub async fn upload(&self, directory: &str, files: Vec<UploadFile>) -> HistoryResult<Version> {
        self.write_upload(Action::Upload, directory, files).await
    }

    /// Replace the contents of an existing `directory` with `files`.
    ///
    /// Display names inside the directory are kept.
    pub async fn reupload(&self, directory: &str, files: Vec<UploadFile>) -> HistoryResult<Version> {
        let (absolute, relative) = self.locate_existing(directory).await?;
        if relative.is_empty() {
            return Err(HistoryError::invalid_state("cannot reupload the project root"));
        }

        let mut reader = fs::read_dir(&absolute)
            .await
            .map_err(|e| HistoryError::io_at(&absolute, e))?;
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| HistoryError::io_at(&absolute, e))?
        {
            let path = entry.path();
            let removed = if path.is_dir() {
                fs::remove_dir_all(&path).await
            } else {
                fs::remove_file(&path).await
            };
            removed.map_err(|e| HistoryError::io_at(&path, e))?;
        }

        self.write_upload(Action::Reupload, &relative, files).await
    }

    /// Set or clear a directory's display name.
    pub async fn set_display_name(
        &self,
        path: &str,
        display_name: Option<String>,
    ) -> HistoryResult<Version> {
        let (absolute, relative) = self.locate_existing(path).await?;
        let display_name = display_name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        self.names.set(&relative, display_name.clone()).await?;

        let version = self
            .ledger
            .record_change(
                Action::Rename,
                ChangeDetails::for_path(&relative).with_display_name(display_name),
            )
            .await?;
        self.touched(&absolute);
        Ok(version)
    }

    /// Whether `path` holds the landing file. Cached.
    pub async fn is_prototype(&self, path: &str) -> HistoryResult<bool> {
        let (absolute, _) = self.locate(path)?;
        if let Some(cached) = self.cache.prototype(&absolute) {
            return Ok(cached);
        }

        let index = absolute.join(self.index_file());
        let is_prototype = fs::metadata(&index)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        self.cache.put_prototype(&absolute, is_prototype);
        Ok(is_prototype)
    }

    /// Visible children of a directory, directories first. Cached.
    pub async fn list_children(&self, path: &str) -> HistoryResult<Vec<ChildEntry>> {
        let (absolute, relative) = self.locate_existing(path).await?;
        if let Some(cached) = self.cache.children(&absolute) {
            return Ok(cached);
        }

        let names = self.names.load().await?;
        let ignore = self.ledger.snapshots().ignore_rules();
        let mut reader = fs::read_dir(&absolute)
            .await
            .map_err(|e| HistoryError::io_at(&absolute, e))?;

        let mut children = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| HistoryError::io_at(&absolute, e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            let child_relative = join_relative(&relative, &name);
            if ignore.is_ignored(&name, &child_relative) {
                continue;
            }
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            let is_prototype = is_dir && self.is_prototype(&child_relative).await?;
            children.push(ChildEntry {
                display_name: names.get(&child_relative).cloned(),
                name,
                relative_path: child_relative,
                is_dir,
                is_prototype,
            });
        }
        children.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then_with(|| a.name.cmp(&b.name)));

        self.cache.put_children(&absolute, children.clone());
        self.cache.spawn_persist(Arc::clone(&self.store), CACHE_DOCUMENT);
        Ok(children)
    }

    /// Roll the tree back to `version_id`.
    pub async fn restore(&self, version_id: VersionId) -> HistoryResult<RestoreReport> {
        let report = self.restorer.restore(version_id).await?;
        self.cache.clear();
        self.cache.spawn_persist(Arc::clone(&self.store), CACHE_DOCUMENT);
        Ok(report)
    }

    pub async fn list_versions(&self, limit: usize) -> HistoryResult<VersionPage> {
        self.ledger.list(limit).await
    }

    pub async fn version(&self, version_id: VersionId) -> HistoryResult<Version> {
        self.ledger.get(version_id).await
    }

    /// Drop all history if `credential` matches the configured secret.
    pub async fn clear_history(&self, credential: &str) -> HistoryResult<usize> {
        self.ledger.clear(credential).await
    }

    async fn write_upload(
        &self,
        action: Action,
        directory: &str,
        files: Vec<UploadFile>,
    ) -> HistoryResult<Version> {
        let (dir_abs, dir_rel) = self.locate(directory)?;
        fs::create_dir_all(&dir_abs)
            .await
            .map_err(|e| HistoryError::io_at(&dir_abs, e))?;

        let mut uploaded = Vec::with_capacity(files.len());
        for file in files {
            let (absolute, relative) = self.locate(&join_relative(&dir_rel, &file.path))?;
            if !absolute.starts_with(&dir_abs) || absolute == dir_abs {
                return Err(HistoryError::OutsideRoot(PathBuf::from(&file.path)));
            }
            if let Some(parent) = absolute.parent() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| HistoryError::io_at(parent, e))?;
            }
            fs::write(&absolute, &file.contents)
                .await
                .map_err(|e| HistoryError::io_at(&absolute, e))?;
            uploaded.push(UploadedFile::new(&relative).with_original(&relative));
        }

        let count = uploaded.len();
        let version = self
            .ledger
            .record_change(action, ChangeDetails::uploaded(&dir_rel, uploaded))
            .await?;
        info!(action = %action, dir = %dir_rel, files = count, "Stored upload");

        self.touched(&dir_abs);
        Ok(version)
    }

    fn index_file(&self) -> &str {
        self.ledger.snapshots().index_file()
    }

    /// Absolute and root-relative forms of a caller path.
    fn locate(&self, path: &str) -> HistoryResult<(PathBuf, String)> {
        let absolute = self.ledger.snapshots().resolve(Path::new(path))?;
        let relative = paths::root_relative(&self.root, &absolute)
            .ok_or_else(|| HistoryError::OutsideRoot(absolute.clone()))?;
        Ok((absolute, relative))
    }

    async fn locate_existing(&self, path: &str) -> HistoryResult<(PathBuf, String)> {
        let (absolute, relative) = self.locate(path)?;
        fs::metadata(&absolute)
            .await
            .map_err(|e| HistoryError::io_at(&absolute, e))?;
        Ok((absolute, relative))
    }

    fn touched(&self, absolute: &Path) {
        self.cache.invalidate(absolute);
        self.cache.spawn_persist(Arc::clone(&self.store), CACHE_DOCUMENT);
    }
}
