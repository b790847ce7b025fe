//! Per-version backup of raw file bytes.
//!
//! Layout:
//! ```text
//! backup_root/
//!   <version_id>/
//!     <backup name>   # byte-for-byte copy
//! ```
//! Backup names keep the relative layout. Segments that are not already
//! safe are sanitized and tagged with a hash of the raw path, so distinct
//! files never share a backup.
//! Each version owns its own subdirectory, so evicting one never touches
//! another's files.

use crate::ignore::IgnoreRules;
use crate::tree::BackupRecord;
use crate::{HistoryError, HistoryResult, VersionId};
use protoshelf_util::path as paths;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tokio::fs;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Characters allowed verbatim in backup paths.
static UNSAFE_CHARS: OnceLock<Regex> = OnceLock::new();

fn unsafe_chars() -> &'static Regex {
    UNSAFE_CHARS.get_or_init(|| {
        Regex::new(r"[^A-Za-z0-9/._-]")
            .expect("Invalid regex pattern - this is a compile-time constant")
    })
}

/// Replace every character outside `[A-Za-z0-9/._-]` with `_`.
///
/// `/` is kept so directory nesting survives; empty and `.`/`..` segments
/// are dropped so the result can never climb out of the version directory.
pub fn sanitize(relative_path: &str) -> String {
    let replaced = unsafe_chars().replace_all(relative_path, "_");
    replaced
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != "." && *segment != "..")
        .collect::<Vec<_>>()
        .join("/")
}

/// Name of a file's backup relative to its version directory.
///
/// Each path segment is kept verbatim when it is already safe. Otherwise it
/// is sanitized and gets `~<hash>` of the raw path up to that segment,
/// before the extension. `~` never survives [`sanitize`], so tagged
/// segments cannot meet verbatim ones.
pub fn backup_name(relative_path: &str) -> String {
    let mut prefix = String::new();
    let mut segments = Vec::new();

    for raw in relative_path.split('/') {
        if !prefix.is_empty() {
            prefix.push('/');
        }
        prefix.push_str(raw);

        let safe = sanitize(raw);
        if safe.is_empty() {
            continue;
        }
        if safe == raw {
            segments.push(safe);
        } else {
            segments.push(tag_segment(&safe, &prefix));
        }
    }

    segments.join("/")
}

fn tag_segment(safe: &str, raw_prefix: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_prefix.as_bytes());
    let tag: String = hasher
        .finalize()
        .iter()
        .take(6)
        .map(|b| format!("{:02x}", b))
        .collect();

    match safe.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}~{tag}.{ext}"),
        _ => format!("{safe}~{tag}"),
    }
}

/// Copies files into per-version backup storage and back out again.
#[derive(Debug, Clone)]
pub struct BackupStore {
    project_root: PathBuf,
    backup_root: PathBuf,
    ignore: Arc<IgnoreRules>,
}

impl BackupStore {
    pub fn new(
        project_root: impl Into<PathBuf>,
        backup_root: impl Into<PathBuf>,
        ignore: Arc<IgnoreRules>,
    ) -> Self {
        Self {
            project_root: paths::normalize(&project_root.into()),
            backup_root: paths::normalize(&backup_root.into()),
            ignore,
        }
    }

    pub fn backup_root(&self) -> &Path {
        &self.backup_root
    }

    /// Directory holding one version's backups.
    pub fn version_dir(&self, version_id: VersionId) -> PathBuf {
        self.backup_root.join(version_id.to_string())
    }

    fn resolve(&self, path: &Path) -> HistoryResult<PathBuf> {
        paths::resolve_inside(&self.project_root, path)
            .ok_or_else(|| HistoryError::OutsideRoot(path.to_path_buf()))
    }

    /// Copy one regular file into `version_id`'s backup directory.
    ///
    /// Returns `None` when the source is missing or not a regular file.
    pub async fn backup_file(
        &self,
        path: &Path,
        version_id: VersionId,
        original_relative_path: Option<String>,
    ) -> HistoryResult<Option<BackupRecord>> {
        let source = self.resolve(path)?;

        match fs::symlink_metadata(&source).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => {
                debug!(path = %source.display(), "Not a regular file, skipping backup");
                return Ok(None);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(HistoryError::io_at(&source, e)),
        }

        let relative = paths::root_relative(&self.project_root, &source)
            .ok_or_else(|| HistoryError::OutsideRoot(source.clone()))?;
        let destination = self.version_dir(version_id).join(backup_name(&relative));

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| HistoryError::io_at(parent, e))?;
        }
        fs::copy(&source, &destination)
            .await
            .map_err(|e| HistoryError::io_at(&source, e))?;

        debug!(
            version_id = %version_id,
            path = %relative,
            "Backed up file"
        );

        Ok(Some(BackupRecord {
            original_absolute_path: source,
            relative_path: relative,
            backup_absolute_path: destination,
            original_relative_path,
        }))
    }

    /// Back up every regular file under `dir`, best-effort.
    ///
    /// Unreadable entries are logged and skipped. The backup root and
    /// anything the ignore rules exclude are never descended into.
    pub async fn backup_tree(
        &self,
        dir: &Path,
        version_id: VersionId,
    ) -> HistoryResult<Vec<BackupRecord>> {
        let dir = self.resolve(dir)?;
        let backup_root = self.backup_root.clone();
        let project_root = self.project_root.clone();
        let ignore = Arc::clone(&self.ignore);
        let walk_root = dir.clone();

        let files = tokio::task::spawn_blocking(move || {
            WalkDir::new(&walk_root)
                .follow_links(false)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|e| {
                    if e.path().starts_with(&backup_root) {
                        return false;
                    }
                    if e.depth() == 0 {
                        return true;
                    }
                    let name = e.file_name().to_string_lossy();
                    let relative = paths::root_relative(&project_root, e.path()).unwrap_or_default();
                    !ignore.is_ignored(&name, &relative)
                })
                .filter_map(|entry| match entry {
                    Ok(entry) => Some(entry),
                    Err(e) => {
                        warn!(error = %e, "Skipping unreadable entry during backup");
                        None
                    }
                })
                .filter(|entry| entry.file_type().is_file())
                .map(|entry| entry.into_path())
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| HistoryError::invalid_state(format!("backup walk panicked: {e}")))?;

        let mut records = Vec::with_capacity(files.len());
        for file in files {
            match self.backup_file(&file, version_id, None).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => {
                    warn!(version_id = %version_id, path = %file.display(), error = %e, "Failed to back up file");
                }
            }
        }

        info!(
            version_id = %version_id,
            dir = %dir.display(),
            files = records.len(),
            "Backed up directory"
        );

        Ok(records)
    }

    /// Where a record's bytes go back to when no override is given.
    pub fn restore_target(&self, record: &BackupRecord) -> HistoryResult<PathBuf> {
        match &record.original_relative_path {
            Some(original) => self.resolve(Path::new(original)),
            None => self.resolve(&record.original_absolute_path),
        }
    }

    /// Copy backed-up bytes back onto the live tree.
    ///
    /// The destination is `destination` if given, else the record's
    /// original relative path, else its original absolute path. Missing
    /// parent directories are created.
    pub async fn restore_file(
        &self,
        record: &BackupRecord,
        version_id: VersionId,
        destination: Option<&Path>,
    ) -> HistoryResult<PathBuf> {
        let target = match destination {
            Some(path) => self.resolve(path)?,
            None => self.restore_target(record)?,
        };

        let source = paths::normalize(&record.backup_absolute_path);
        if !source.starts_with(self.version_dir(version_id)) {
            return Err(HistoryError::invalid_state(format!(
                "backup {} does not belong to version {}",
                source.display(),
                version_id
            )));
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| HistoryError::io_at(parent, e))?;
        }
        fs::copy(&source, &target)
            .await
            .map_err(|e| HistoryError::io_at(&source, e))?;

        debug!(version_id = %version_id, path = %target.display(), "Restored file from backup");
        Ok(target)
    }

    /// Remove all backups of one version. Failures are logged, never raised.
    pub async fn evict(&self, version_id: VersionId) {
        let dir = self.version_dir(version_id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => info!(version_id = %version_id, "Evicted version backups"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(version_id = %version_id, path = %dir.display(), error = %e, "Failed to evict version backups");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, BackupStore) {
        let dir = TempDir::new().unwrap();
        let store = BackupStore::new(
            dir.path(),
            dir.path().join(".protoshelf/backups"),
            Arc::new(IgnoreRules::new()),
        );
        (dir, store)
    }

    fn write(dir: &TempDir, rel: &str, content: &[u8]) {
        let path = dir.path().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("site/index.html"), "site/index.html");
        assert_eq!(sanitize("my site/hello world!.txt"), "my_site/hello_world_.txt");
        assert_eq!(sanitize("démo/ünï.txt"), "d_mo/_n_.txt");
        assert_eq!(sanitize("../escape/./x"), "escape/x");
        assert_eq!(sanitize("a//b"), "a/b");
    }

    #[test]
    fn test_backup_name_keeps_safe_paths() {
        assert_eq!(backup_name("site/index.html"), "site/index.html");
        assert_eq!(backup_name("site/js/app.min.js"), "site/js/app.min.js");
        assert!(!backup_name("../escape/x").contains(".."));
    }

    #[test]
    fn test_backup_name_separates_colliding_siblings() {
        let a = backup_name("X/ä.txt");
        let o = backup_name("X/ö.txt");
        assert_ne!(a, o);
        assert!(a.starts_with("X/_~") && a.ends_with(".txt"), "{a}");

        assert_ne!(backup_name("a b.txt"), backup_name("a_b.txt"));
        assert_eq!(backup_name("a_b.txt"), "a_b.txt");

        // A sanitized directory never lands on a verbatim sibling.
        assert_ne!(backup_name("ä/x.txt"), backup_name("_/x.txt"));
        assert!(!backup_name("ä/x.txt").starts_with("_/"));
    }

    #[tokio::test]
    async fn test_colliding_names_restore_their_own_bytes() {
        let (dir, store) = setup();
        write(&dir, "X/ä.txt", b"one");
        write(&dir, "X/ö.txt", b"two");
        let id = VersionId(20);

        let records = store.backup_tree(Path::new("X"), id).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_ne!(records[0].backup_absolute_path, records[1].backup_absolute_path);

        std::fs::remove_dir_all(dir.path().join("X")).unwrap();
        for record in &records {
            store.restore_file(record, id, None).await.unwrap();
        }
        assert_eq!(std::fs::read(dir.path().join("X/ä.txt")).unwrap(), b"one");
        assert_eq!(std::fs::read(dir.path().join("X/ö.txt")).unwrap(), b"two");
    }

    #[tokio::test]
    async fn test_backup_and_restore_file() {
        let (dir, store) = setup();
        write(&dir, "site/page one.html", b"original");
        let id = VersionId(1000);

        let record = store
            .backup_file(Path::new("site/page one.html"), id, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.relative_path, "site/page one.html");
        assert!(record.backup_absolute_path.starts_with(store.version_dir(id)));
        let name = record.backup_absolute_path.file_name().unwrap().to_string_lossy();
        assert!(name.starts_with("page_one~") && name.ends_with(".html"), "{name}");

        write(&dir, "site/page one.html", b"changed");
        store.restore_file(&record, id, None).await.unwrap();
        let content = std::fs::read(dir.path().join("site/page one.html")).unwrap();
        assert_eq!(content, b"original");
    }

    #[tokio::test]
    async fn test_backup_missing_or_directory_is_none() {
        let (dir, store) = setup();
        std::fs::create_dir_all(dir.path().join("folder")).unwrap();

        assert!(store
            .backup_file(Path::new("nope.txt"), VersionId(1), None)
            .await
            .unwrap()
            .is_none());
        assert!(store
            .backup_file(Path::new("folder"), VersionId(1), None)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_backup_rejects_outside_root() {
        let (_dir, store) = setup();
        let result = store
            .backup_file(Path::new("../../etc/passwd"), VersionId(1), None)
            .await;
        assert!(matches!(result, Err(HistoryError::OutsideRoot(_))));
    }

    #[tokio::test]
    async fn test_backup_tree_collects_all_files() {
        let (dir, store) = setup();
        write(&dir, "site/index.html", b"i");
        write(&dir, "site/js/app.js", b"a");
        write(&dir, "site/img/logo.png", &[0, 159, 146, 150]);

        let records = store
            .backup_tree(Path::new("site"), VersionId(7))
            .await
            .unwrap();
        let mut paths: Vec<_> = records.iter().map(|r| r.relative_path.as_str()).collect();
        paths.sort();
        assert_eq!(paths, vec!["site/img/logo.png", "site/index.html", "site/js/app.js"]);
    }

    #[tokio::test]
    async fn test_backup_tree_of_root_skips_backup_dir() {
        let (dir, store) = setup();
        write(&dir, "a.txt", b"a");
        write(&dir, ".git/HEAD", b"ref");
        store
            .backup_file(Path::new("a.txt"), VersionId(1), None)
            .await
            .unwrap();

        let records = store.backup_tree(Path::new(""), VersionId(2)).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].relative_path, "a.txt");
    }

    #[tokio::test]
    async fn test_restore_to_original_relative_path() {
        let (dir, store) = setup();
        write(&dir, "flat/logo.png", b"png");
        let id = VersionId(3);

        let record = store
            .backup_file(
                Path::new("flat/logo.png"),
                id,
                Some("site/assets/logo.png".to_string()),
            )
            .await
            .unwrap()
            .unwrap();

        let target = store.restore_file(&record, id, None).await.unwrap();
        assert!(target.ends_with("site/assets/logo.png"));
        assert_eq!(std::fs::read(target).unwrap(), b"png");
    }

    #[tokio::test]
    async fn test_restore_with_override_destination() {
        let (dir, store) = setup();
        write(&dir, "a.txt", b"bytes");
        let id = VersionId(4);
        let record = store
            .backup_file(Path::new("a.txt"), id, None)
            .await
            .unwrap()
            .unwrap();

        store
            .restore_file(&record, id, Some(Path::new("copies/b.txt")))
            .await
            .unwrap();
        assert_eq!(std::fs::read(dir.path().join("copies/b.txt")).unwrap(), b"bytes");
    }

    #[tokio::test]
    async fn test_restore_refuses_foreign_backup() {
        let (dir, store) = setup();
        write(&dir, "a.txt", b"bytes");
        let record = store
            .backup_file(Path::new("a.txt"), VersionId(5), None)
            .await
            .unwrap()
            .unwrap();

        let result = store.restore_file(&record, VersionId(6), None).await;
        assert!(matches!(result, Err(HistoryError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_evict_is_isolated() {
        let (dir, store) = setup();
        write(&dir, "a.txt", b"a");
        let keep = VersionId(10);
        let evicted = VersionId(11);
        store.backup_file(Path::new("a.txt"), keep, None).await.unwrap();
        store.backup_file(Path::new("a.txt"), evicted, None).await.unwrap();

        store.evict(evicted).await;
        assert!(!store.version_dir(evicted).exists());
        assert!(store.version_dir(keep).join("a.txt").exists());

        // Evicting something already gone is silent.
        store.evict(evicted).await;
    }
}
