//! Restore engine: reconcile the live tree with a recorded version.

use crate::ledger::Ledger;
use crate::names::is_same_or_below;
use crate::tree::{BackupRecord, DirectoryNode};
use crate::version::{Action, ChangeDetails, Version, VersionId};
use crate::{HistoryError, HistoryResult};
use protoshelf_storage::DocumentStore;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};

/// Outcome of a restore.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreReport {
    pub version_id: VersionId,
    /// Human-readable description of each applied change.
    pub restored: Vec<String>,
    /// Individual steps that failed. A restore with errors still completes.
    pub errors: Vec<String>,
    /// Id of the `restore` version recorded afterwards.
    pub restore_version: Option<VersionId>,
}

impl RestoreReport {
    fn new(version_id: VersionId) -> Self {
        Self {
            version_id,
            ..Default::default()
        }
    }

    fn fail(&mut self, message: String) {
        warn!(version_id = %self.version_id, "{message}");
        self.errors.push(message);
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Brings the live tree back to the state captured by a version.
pub struct RestoreEngine<S> {
    ledger: Arc<Ledger<S>>,
}

impl<S: DocumentStore + 'static> RestoreEngine<S> {
    pub fn new(ledger: Arc<Ledger<S>>) -> Self {
        Self { ledger }
    }

    /// Restore the version `version_id`.
    ///
    /// Individual deletion, creation and copy failures are collected in the
    /// report; only a missing or unusable version aborts the restore. A
    /// `restore` version is recorded on completion.
    pub async fn restore(&self, version_id: VersionId) -> HistoryResult<RestoreReport> {
        let target = self.ledger.get(version_id).await?;
        let target_tree = target.snapshot.file_system.as_ref().ok_or_else(|| {
            HistoryError::invalid_state(format!("version {version_id} has no file system snapshot"))
        })?;

        info!(version_id = %version_id, action = %target.action, "Restoring version");

        let live_names = self.ledger.names().load().await?;
        let current = self
            .ledger
            .snapshots()
            .capture_full(live_names.clone())
            .await?;
        let mut report = RestoreReport::new(version_id);

        if live_names != target_tree.custom_names {
            match self
                .ledger
                .names()
                .replace_all(target_tree.custom_names.clone())
                .await
            {
                Ok(()) => report.restored.push("Restored display names".to_string()),
                Err(e) => report.fail(format!("Failed to restore display names: {e}")),
            }
        }

        let current_dirs = current.directories.flatten_dirs();
        let target_dirs = target_tree.directories.flatten_dirs();
        let current_files = current.directories.flatten_files();
        let target_files = target_tree.directories.flatten_files();

        let removed = self
            .remove_extra_directories(&current_dirs, &target_dirs, &mut report)
            .await;
        self.remove_extra_files(&current_files, &target_files, &removed, &mut report)
            .await;
        self.create_missing_directories(&current_dirs, &target_dirs, &mut report)
            .await;
        self.restore_contents(&target, &target_files, &mut report).await;

        if let Some(subtree) = &target.snapshot.directory_snapshot {
            if subtree.relative_path.is_empty() || target_dirs.contains_key(&subtree.relative_path) {
                self.restore_deleted_directory(&target, subtree, &mut report)
                    .await;
            }
        }

        let recorded = self
            .ledger
            .record_change(
                Action::Restore,
                ChangeDetails::restored(version_id, report.restored.clone()),
            )
            .await?;
        report.restore_version = Some(recorded.id);

        info!(
            version_id = %version_id,
            changes = report.restored.len(),
            errors = report.errors.len(),
            "Restore finished"
        );
        Ok(report)
    }

    fn live_path(&self, relative: &str) -> HistoryResult<PathBuf> {
        self.ledger.snapshots().resolve(Path::new(relative))
    }

    /// Remove directories absent from the target, outermost first. Returns
    /// the removed paths.
    async fn remove_extra_directories(
        &self,
        current: &BTreeMap<String, &DirectoryNode>,
        target: &BTreeMap<String, &DirectoryNode>,
        report: &mut RestoreReport,
    ) -> Vec<String> {
        let mut removed: Vec<String> = Vec::new();
        for relative in current.keys() {
            if target.contains_key(relative) {
                continue;
            }
            if removed.iter().any(|r| is_same_or_below(relative, r)) {
                continue;
            }
            let path = match self.live_path(relative) {
                Ok(path) => path,
                Err(e) => {
                    report.fail(format!("Failed to remove directory {relative}: {e}"));
                    continue;
                }
            };
            match fs::remove_dir_all(&path).await {
                Ok(()) => {
                    report.restored.push(format!("Removed directory {relative}"));
                    removed.push(relative.clone());
                }
                Err(e) => report.fail(format!("Failed to remove directory {relative}: {e}")),
            }
        }
        removed
    }

    /// Create directories present only in the target, parents first.
    async fn create_missing_directories(
        &self,
        current: &BTreeMap<String, &DirectoryNode>,
        target: &BTreeMap<String, &DirectoryNode>,
        report: &mut RestoreReport,
    ) {
        for relative in target.keys() {
            if current.contains_key(relative) {
                continue;
            }
            let created = match self.live_path(relative) {
                Ok(path) => fs::create_dir_all(&path).await.map_err(HistoryError::from),
                Err(e) => Err(e),
            };
            match created {
                Ok(()) => report.restored.push(format!("Created directory {relative}")),
                Err(e) => report.fail(format!("Failed to create directory {relative}: {e}")),
            }
        }
    }

    async fn remove_extra_files<F>(
        &self,
        current: &BTreeMap<String, F>,
        target: &BTreeMap<String, F>,
        removed_dirs: &[String],
        report: &mut RestoreReport,
    ) {
        for relative in current.keys() {
            if target.contains_key(relative) {
                continue;
            }
            if removed_dirs.iter().any(|dir| is_same_or_below(relative, dir)) {
                continue;
            }
            let path = match self.live_path(relative) {
                Ok(path) => path,
                Err(e) => {
                    report.fail(format!("Failed to remove file {relative}: {e}"));
                    continue;
                }
            };
            match fs::remove_file(&path).await {
                Ok(()) => report.restored.push(format!("Removed file {relative}")),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => report.fail(format!("Failed to remove file {relative}: {e}")),
            }
        }
    }

    /// Copy back files this version backed up, when the target tree still
    /// contains them and the live bytes differ.
    async fn restore_contents<F>(
        &self,
        version: &Version,
        target_files: &BTreeMap<String, F>,
        report: &mut RestoreReport,
    ) {
        let backups = self.ledger.backups();
        for record in &version.snapshot.backed_files {
            if !target_files.contains_key(&record.relative_path) {
                continue;
            }
            let destination = match backups.restore_target(record) {
                Ok(path) => path,
                Err(e) => {
                    report.fail(format!("Failed to restore file {}: {e}", record.relative_path));
                    continue;
                }
            };
            self.copy_back(version.id, record, &destination, report)
                .await;
        }
    }

    /// Rebuild a directory removed by this version from its pre-delete
    /// subtree. Files without a surviving backup come back empty.
    async fn restore_deleted_directory(
        &self,
        version: &Version,
        subtree: &DirectoryNode,
        report: &mut RestoreReport,
    ) {
        let by_path: HashMap<&str, &BackupRecord> = version
            .snapshot
            .backed_files
            .iter()
            .map(|record| (record.relative_path.as_str(), record))
            .collect();

        let mut directories = vec![subtree.relative_path.clone()];
        directories.extend(subtree.flatten_dirs().into_keys());
        for relative in directories.iter().filter(|r| !r.is_empty()) {
            let path = match self.live_path(relative) {
                Ok(path) => path,
                Err(e) => {
                    report.fail(format!("Failed to create directory {relative}: {e}"));
                    continue;
                }
            };
            if path.is_dir() {
                continue;
            }
            match fs::create_dir_all(&path).await {
                Ok(()) => report.restored.push(format!("Created directory {relative}")),
                Err(e) => report.fail(format!("Failed to create directory {relative}: {e}")),
            }
        }

        for relative in subtree.flatten_files().into_keys() {
            let destination = match self.live_path(&relative) {
                Ok(path) => path,
                Err(e) => {
                    report.fail(format!("Failed to restore file {relative}: {e}"));
                    continue;
                }
            };

            let backed = by_path
                .get(relative.as_str())
                .filter(|record| record.backup_absolute_path.is_file());
            if let Some(record) = backed {
                self.copy_back(version.id, record, &destination, report)
                    .await;
            } else if !destination.exists() {
                match fs::write(&destination, b"").await {
                    Ok(()) => report.restored.push(format!("Created placeholder {relative}")),
                    Err(e) => report.fail(format!("Failed to create file {relative}: {e}")),
                }
            }
        }
    }

    async fn copy_back(
        &self,
        version_id: VersionId,
        record: &BackupRecord,
        destination: &Path,
        report: &mut RestoreReport,
    ) {
        if !record.backup_absolute_path.is_file() {
            debug!(
                version_id = %version_id,
                path = %record.relative_path,
                "Backup no longer present, skipping content restore"
            );
            return;
        }
        if same_content(&record.backup_absolute_path, destination).await {
            return;
        }

        let backups = self.ledger.backups();
        match backups
            .restore_file(record, version_id, Some(destination))
            .await
        {
            Ok(path) => {
                let shown = protoshelf_util::path::root_relative(
                    self.ledger.snapshots().root(),
                    &path,
                )
                .unwrap_or_else(|| record.relative_path.clone());
                report.restored.push(format!("Restored file {shown}"));
            }
            Err(e) => report.fail(format!("Failed to restore file {}: {e}", record.relative_path)),
        }
    }
}

/// True when both files exist and hold identical bytes.
async fn same_content(a: &Path, b: &Path) -> bool {
    let (Ok(meta_a), Ok(meta_b)) = (fs::metadata(a).await, fs::metadata(b).await) else {
        return false;
    };
    if !meta_b.is_file() || meta_a.len() != meta_b.len() {
        return false;
    }
    match (fs::read(a).await, fs::read(b).await) {
        (Ok(x), Ok(y)) => x == y,
        _ => false,
    }
}
