//! Snapshot builder: recursive capture of directory and file metadata.

use crate::ignore::IgnoreRules;
use crate::names::CustomNames;
use crate::tree::{DirectoryNode, FileRecord, TreeSnapshot};
use crate::{HistoryError, HistoryResult};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use protoshelf_util::{path as paths, SharedClock};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, warn};

/// Walks the project root (or a subtree of it) into [`DirectoryNode`]s.
#[derive(Clone)]
pub struct SnapshotBuilder {
    root: PathBuf,
    ignore: Arc<IgnoreRules>,
    index_file: String,
    clock: SharedClock,
}

impl SnapshotBuilder {
    pub fn new(
        root: impl Into<PathBuf>,
        ignore: Arc<IgnoreRules>,
        index_file: impl Into<String>,
        clock: SharedClock,
    ) -> Self {
        Self {
            root: paths::normalize(&root.into()),
            ignore,
            index_file: index_file.into(),
            clock,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ignore_rules(&self) -> &IgnoreRules {
        &self.ignore
    }

    /// Landing file that marks a prototype directory.
    pub fn index_file(&self) -> &str {
        &self.index_file
    }

    /// Capture the whole project tree together with `custom_names`.
    pub async fn capture_full(&self, custom_names: CustomNames) -> HistoryResult<TreeSnapshot> {
        let directories = self
            .walk(self.root.clone(), String::new())
            .await
            .map_err(|e| HistoryError::io_at(&self.root, e))?;

        debug!(
            root = %self.root.display(),
            files = directories.file_count(),
            "Captured full snapshot"
        );

        Ok(TreeSnapshot {
            directories,
            custom_names,
            timestamp: self.clock.now(),
        })
    }

    /// Capture the subtree rooted at `path` (root-relative or absolute).
    ///
    /// Relative paths inside the result stay relative to the project root.
    pub async fn capture_subtree(&self, path: &Path) -> HistoryResult<DirectoryNode> {
        let absolute = self.resolve(path)?;
        let relative = paths::root_relative(&self.root, &absolute)
            .ok_or_else(|| HistoryError::OutsideRoot(absolute.clone()))?;

        self.walk(absolute.clone(), relative)
            .await
            .map_err(|e| HistoryError::io_at(&absolute, e))
    }

    /// Resolve a caller path, rejecting anything outside the root.
    pub fn resolve(&self, path: &Path) -> HistoryResult<PathBuf> {
        paths::resolve_inside(&self.root, path)
            .ok_or_else(|| HistoryError::OutsideRoot(path.to_path_buf()))
    }

    /// Walk one directory. Unreadable children are logged and skipped; only
    /// a failure to read `dir` itself is returned.
    fn walk(&self, dir: PathBuf, relative: String) -> BoxFuture<'_, std::io::Result<DirectoryNode>> {
        Box::pin(async move {
            let meta = fs::metadata(&dir).await?;
            let mut reader = fs::read_dir(&dir).await?;
            let mut entries = Vec::new();
            while let Some(entry) = reader.next_entry().await? {
                entries.push(entry);
            }
            entries.sort_by_key(|e| e.file_name());

            let mut files = Vec::new();
            let mut subdirectories = Vec::new();

            for entry in entries {
                let name = entry.file_name().to_string_lossy().into_owned();
                let child_relative = join_relative(&relative, &name);
                if self.ignore.is_ignored(&name, &child_relative) {
                    continue;
                }

                let file_type = match entry.file_type().await {
                    Ok(t) => t,
                    Err(e) => {
                        warn!(path = %entry.path().display(), error = %e, "Skipping unreadable entry");
                        continue;
                    }
                };

                if file_type.is_dir() {
                    match self.walk(entry.path(), child_relative).await {
                        Ok(node) => subdirectories.push(node),
                        Err(e) => {
                            warn!(path = %entry.path().display(), error = %e, "Skipping unreadable directory");
                        }
                    }
                } else if file_type.is_file() {
                    match entry.metadata().await {
                        Ok(file_meta) => files.push(FileRecord {
                            name,
                            absolute_path: entry.path(),
                            relative_path: child_relative,
                            size: file_meta.len(),
                            modified_at: file_meta.modified().ok().map(DateTime::<Utc>::from),
                        }),
                        Err(e) => {
                            warn!(path = %entry.path().display(), error = %e, "Skipping unreadable file");
                        }
                    }
                } else {
                    debug!(path = %entry.path().display(), "Skipping non-regular entry");
                }
            }

            let has_index = files.iter().any(|f| f.name == self.index_file);
            let name = dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            Ok(DirectoryNode {
                name,
                absolute_path: dir,
                relative_path: relative,
                has_index,
                files,
                subdirectories,
                modified_at: meta.modified().ok().map(DateTime::<Utc>::from),
            })
        })
    }
}

/// Append `name` to a root-relative path.
pub(crate) fn join_relative(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}
