//! End-to-end history scenarios against a real project root.

use protoshelf_history::{
    Action, ChangeDetails, HistoryConfig, HistoryError, UploadFile, Workspace,
};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

async fn open(dir: &TempDir) -> Workspace {
    Workspace::open(HistoryConfig::new(dir.path())).await.unwrap()
}

async fn open_with(dir: &TempDir, edit: impl FnOnce(&mut HistoryConfig)) -> Workspace {
    let mut config = HistoryConfig::new(dir.path());
    edit(&mut config);
    Workspace::open(config).await.unwrap()
}

async fn live_paths(ws: &Workspace) -> BTreeSet<String> {
    ws.ledger()
        .snapshots()
        .capture_full(Default::default())
        .await
        .unwrap()
        .directories
        .relative_paths()
}

#[tokio::test]
async fn ids_increase_and_restore_matches_recorded_tree() {
    let dir = TempDir::new().unwrap();
    let ws = open(&dir).await;

    let mut versions = Vec::new();
    versions.push(ws.create_dir("alpha").await.unwrap());
    versions.push(
        ws.upload("alpha", vec![UploadFile::new("index.html", "<p>a</p>")])
            .await
            .unwrap(),
    );
    versions.push(ws.rename("alpha", "beta").await.unwrap());
    versions.push(
        ws.upload(
            "gamma",
            vec![
                UploadFile::new("index.html", "g"),
                UploadFile::new("js/app.js", "1"),
            ],
        )
        .await
        .unwrap(),
    );
    versions.push(ws.delete("beta").await.unwrap());

    for pair in versions.windows(2) {
        assert!(pair[1].id > pair[0].id);
    }

    let page = ws.list_versions(100).await.unwrap();
    let listed: Vec<_> = page.versions.iter().map(|v| v.id).collect();
    let mut sorted = listed.clone();
    sorted.sort_by(|a, b| b.cmp(a));
    assert_eq!(listed, sorted);

    // Restoring the version just recorded is a no-op on the path set.
    let v = ws.create_dir("delta/nested").await.unwrap();
    ws.restore(v.id).await.unwrap();
    let recorded = v.snapshot.file_system.unwrap().directories.relative_paths();
    assert_eq!(live_paths(&ws).await, recorded);
}

#[tokio::test]
async fn restoring_older_version_matches_its_tree() {
    let dir = TempDir::new().unwrap();
    let ws = open(&dir).await;

    let v = ws
        .upload("site", vec![UploadFile::new("index.html", "one")])
        .await
        .unwrap();
    ws.upload("other", vec![UploadFile::new("a/b.txt", "b")])
        .await
        .unwrap();
    ws.rename("site", "renamed").await.unwrap();

    let report = ws.restore(v.id).await.unwrap();
    assert!(report.is_clean(), "{:?}", report.errors);

    let recorded = v.snapshot.file_system.unwrap().directories.relative_paths();
    assert_eq!(live_paths(&ws).await, recorded);
    assert_eq!(
        std::fs::read_to_string(dir.path().join("site/index.html")).unwrap(),
        "one"
    );
}

#[tokio::test]
async fn second_restore_is_empty() {
    let dir = TempDir::new().unwrap();
    let ws = open(&dir).await;

    let v = ws
        .upload("site", vec![UploadFile::new("index.html", "one")])
        .await
        .unwrap();
    ws.create_dir("extra").await.unwrap();
    std::fs::write(dir.path().join("site/index.html"), "changed").unwrap();

    let first = ws.restore(v.id).await.unwrap();
    assert!(!first.restored.is_empty());

    let second = ws.restore(v.id).await.unwrap();
    assert!(second.restored.is_empty(), "{:?}", second.restored);
    assert!(second.errors.is_empty());
}

#[tokio::test]
async fn retention_keeps_last_hundred() {
    let dir = TempDir::new().unwrap();
    let ws = open(&dir).await;

    let oldest = ws
        .upload("site", vec![UploadFile::new("index.html", "x")])
        .await
        .unwrap();
    let oldest_backups = ws.ledger().backups().version_dir(oldest.id);
    assert!(oldest_backups.is_dir());

    for _ in 0..100 {
        ws.ledger()
            .record_change(Action::Create, ChangeDetails::default())
            .await
            .unwrap();
    }

    let page = ws.list_versions(200).await.unwrap();
    assert_eq!(page.total, 100);
    assert!(matches!(
        ws.version(oldest.id).await,
        Err(HistoryError::NotFound(_))
    ));
    assert!(!oldest_backups.exists());
}

#[tokio::test]
async fn eviction_is_isolated() {
    let dir = TempDir::new().unwrap();
    let ws = open(&dir).await;

    let first = ws
        .upload("a", vec![UploadFile::new("f.txt", "1")])
        .await
        .unwrap();
    let second = ws
        .upload("b", vec![UploadFile::new("g.txt", "2")])
        .await
        .unwrap();

    ws.ledger().backups().evict(first.id).await;

    assert!(!ws.ledger().backups().version_dir(first.id).exists());
    for record in &second.snapshot.backed_files {
        assert!(record.backup_absolute_path.is_file());
    }
}

#[tokio::test]
async fn delete_then_restore_brings_back_content() {
    let dir = TempDir::new().unwrap();
    let ws = open(&dir).await;

    ws.create_dir("D").await.unwrap();
    std::fs::write(dir.path().join("D/f.txt"), "hello").unwrap();

    let vd = ws.delete("D").await.unwrap();
    assert!(vd.snapshot.directory_snapshot.is_some());
    assert!(!dir.path().join("D").exists());

    ws.restore(vd.id).await.unwrap();
    assert_eq!(
        std::fs::read_to_string(dir.path().join("D/f.txt")).unwrap(),
        "hello"
    );
}

#[tokio::test]
async fn upload_then_restore_recovers_deleted_file() {
    let dir = TempDir::new().unwrap();
    let ws = open(&dir).await;

    let vu = ws
        .upload("X", vec![UploadFile::new("g.txt", "world")])
        .await
        .unwrap();
    std::fs::remove_file(dir.path().join("X/g.txt")).unwrap();

    let report = ws.restore(vu.id).await.unwrap();
    assert_eq!(
        std::fs::read_to_string(dir.path().join("X/g.txt")).unwrap(),
        "world"
    );
    assert!(report.restored.iter().any(|r| r.ends_with("X/g.txt")));
}

#[tokio::test]
async fn concurrent_records_keep_ledger_valid() {
    let dir = TempDir::new().unwrap();
    let ws = Arc::new(open(&dir).await);

    let a = {
        let ws = Arc::clone(&ws);
        tokio::spawn(async move {
            ws.ledger()
                .record_change(Action::Create, ChangeDetails::for_path("a"))
                .await
        })
    };
    let b = {
        let ws = Arc::clone(&ws);
        tokio::spawn(async move {
            ws.ledger()
                .record_change(Action::Create, ChangeDetails::for_path("b"))
                .await
        })
    };
    let (a, b) = (a.await.unwrap(), b.await.unwrap());
    assert!(a.is_ok() || b.is_ok());

    let ledger_file = HistoryConfig::new(dir.path())
        .data_root()
        .join("versions.json");
    let raw = std::fs::read_to_string(ledger_file).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
    let persisted = parsed["versions"].as_array().unwrap().len();
    assert_eq!(persisted, [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count());
}

#[tokio::test]
async fn non_ascii_nested_files_round_trip() {
    let dir = TempDir::new().unwrap();
    let ws = open(&dir).await;
    let bytes: Vec<u8> = vec![0, 159, 146, 150, 255, b'\n', 42];

    let v = ws
        .upload(
            "démos",
            vec![
                UploadFile::new("ünï/çødé/日本語/データ.bin", bytes.clone()),
                // Sibling pairs that sanitize to the same name.
                UploadFile::new("X/ä.txt", "one"),
                UploadFile::new("X/ö.txt", "two"),
                UploadFile::new("a b.txt", "three"),
                UploadFile::new("a_b.txt", "four"),
            ],
        )
        .await
        .unwrap();

    let version_dir = ws.ledger().backups().version_dir(v.id);
    let mut backup_names = BTreeSet::new();
    for record in &v.snapshot.backed_files {
        let backup_name = record
            .backup_absolute_path
            .strip_prefix(&version_dir)
            .unwrap()
            .to_string_lossy()
            .into_owned();
        assert!(backup_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-~".contains(c)));
        backup_names.insert(backup_name);
    }
    assert_eq!(backup_names.len(), v.snapshot.backed_files.len());

    let live = dir.path().join("démos/ünï/çødé/日本語/データ.bin");
    std::fs::write(&live, b"clobbered").unwrap();
    ws.restore(v.id).await.unwrap();
    assert_eq!(std::fs::read(&live).unwrap(), bytes);

    ws.delete("démos").await.unwrap();
    ws.restore(v.id).await.unwrap();

    let read = |rel: &str| std::fs::read(dir.path().join("démos").join(rel)).unwrap();
    assert_eq!(read("ünï/çødé/日本語/データ.bin"), bytes);
    assert_eq!(read("X/ä.txt"), b"one");
    assert_eq!(read("X/ö.txt"), b"two");
    assert_eq!(read("a b.txt"), b"three");
    assert_eq!(read("a_b.txt"), b"four");
}

#[tokio::test]
async fn light_deletion_cannot_be_restored() {
    let dir = TempDir::new().unwrap();
    let ws = open(&dir).await;
    ws.upload("gone", vec![UploadFile::new("a.txt", "a")])
        .await
        .unwrap();

    let subtree = ws
        .ledger()
        .snapshots()
        .capture_subtree(Path::new("gone"))
        .await
        .unwrap();
    let light = ws
        .ledger()
        .record_deletion(ChangeDetails::for_path("gone"), subtree)
        .await
        .unwrap();

    let summary = &ws.list_versions(1).await.unwrap().versions[0];
    assert_eq!(summary.id, light.id);
    assert!(!summary.has_snapshot);
    assert!(matches!(
        ws.restore(light.id).await,
        Err(HistoryError::InvalidState(_))
    ));
}

#[tokio::test]
async fn clear_requires_matching_secret() {
    let dir = TempDir::new().unwrap();
    let ws = open_with(&dir, |c| c.clear_secret = Some("open-sesame".into())).await;
    ws.create_dir("a").await.unwrap();

    assert!(matches!(
        ws.clear_history("nope").await,
        Err(HistoryError::Auth)
    ));
    assert_eq!(ws.list_versions(10).await.unwrap().total, 1);

    assert_eq!(ws.clear_history("open-sesame").await.unwrap(), 1);
    assert_eq!(ws.list_versions(10).await.unwrap().total, 0);
}

#[tokio::test]
async fn history_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let first = {
        let ws = open(&dir).await;
        ws.create_dir("a").await.unwrap()
    };

    let ws = open(&dir).await;
    let next = ws.create_dir("b").await.unwrap();
    assert!(next.id > first.id);
    assert_eq!(ws.list_versions(10).await.unwrap().total, 2);
}
