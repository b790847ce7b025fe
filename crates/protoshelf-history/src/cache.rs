//! Short-lived memoization of expensive directory scans.
//!
//! [`TtlCache`] is a plain time-bounded map driven by an injected clock.
//! [`MetadataCache`] holds the two scans the browse surface needs (prototype
//! detection and child listing) and is invalidated explicitly whenever a
//! mutation touches a path or its parent.

use chrono::{DateTime, Duration, Utc};
use protoshelf_storage::DocumentStore;
use protoshelf_util::SharedClock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::Hash;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

struct Entry<V> {
    value: V,
    last_update: DateTime<Utc>,
}

/// A map whose entries expire `ttl` after they were written.
pub struct TtlCache<K, V> {
    ttl: Duration,
    clock: SharedClock,
    entries: RwLock<HashMap<K, Entry<V>>>,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlCache<K, V> {
    pub fn new(ttl: Duration, clock: SharedClock) -> Self {
        Self {
            ttl,
            clock,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// The cached value, if it is still fresh.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(key)
            .filter(|entry| now - entry.last_update < self.ttl)
            .map(|entry| entry.value.clone())
    }

    pub fn insert(&self, key: K, value: V) {
        self.insert_at(key, value, self.clock.now());
    }

    fn insert_at(&self, key: K, value: V, last_update: DateTime<Utc>) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key, Entry { value, last_update });
    }

    pub fn invalidate(&self, key: &K) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
    }

    pub fn clear(&self) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.clear();
    }

    /// Fresh entries with their write time.
    fn fresh_entries(&self) -> Vec<(K, V, DateTime<Utc>)> {
        let now = self.clock.now();
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .iter()
            .filter(|(_, entry)| now - entry.last_update < self.ttl)
            .map(|(key, entry)| (key.clone(), entry.value.clone(), entry.last_update))
            .collect()
    }
}

/// One child of a browsed directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildEntry {
    pub name: String,
    pub relative_path: String,
    pub is_dir: bool,
    pub is_prototype: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedEntry {
    path: PathBuf,
    is_prototype: bool,
    last_update: DateTime<Utc>,
}

/// Cached prototype flags and child listings, keyed by directory path.
pub struct MetadataCache {
    prototypes: TtlCache<PathBuf, bool>,
    children: TtlCache<PathBuf, Vec<ChildEntry>>,
}

impl MetadataCache {
    pub fn new(ttl: Duration, clock: SharedClock) -> Self {
        Self {
            prototypes: TtlCache::new(ttl, Arc::clone(&clock)),
            children: TtlCache::new(ttl, clock),
        }
    }

    pub fn prototype(&self, path: &Path) -> Option<bool> {
        self.prototypes.get(&path.to_path_buf())
    }

    pub fn put_prototype(&self, path: &Path, is_prototype: bool) {
        self.prototypes.insert(path.to_path_buf(), is_prototype);
    }

    pub fn children(&self, path: &Path) -> Option<Vec<ChildEntry>> {
        self.children.get(&path.to_path_buf())
    }

    pub fn put_children(&self, path: &Path, children: Vec<ChildEntry>) {
        self.children.insert(path.to_path_buf(), children);
    }

    /// Forget everything cached for `path` and its parent.
    pub fn invalidate(&self, path: &Path) {
        let mut targets = vec![path.to_path_buf()];
        if let Some(parent) = path.parent() {
            targets.push(parent.to_path_buf());
        }
        for target in &targets {
            self.prototypes.invalidate(target);
            self.children.invalidate(target);
        }
        debug!(path = %path.display(), "Invalidated metadata cache");
    }

    pub fn clear(&self) {
        self.prototypes.clear();
        self.children.clear();
    }

    /// Write the prototype flags to a sidecar document in the background.
    ///
    /// Failures are logged; the caller never waits on the write.
    pub fn spawn_persist<S>(&self, store: Arc<S>, document: &str) -> JoinHandle<()>
    where
        S: DocumentStore + 'static,
    {
        let entries: Vec<PersistedEntry> = self
            .prototypes
            .fresh_entries()
            .into_iter()
            .map(|(path, is_prototype, last_update)| PersistedEntry {
                path,
                is_prototype,
                last_update,
            })
            .collect();
        let document = document.to_string();

        tokio::spawn(async move {
            if let Err(e) = store.write(&document, &entries).await {
                warn!(document = %document, error = %e, "Failed to persist metadata cache");
            }
        })
    }

    /// Seed prototype flags from a sidecar written by [`spawn_persist`].
    ///
    /// Entries keep their original write time, so stale ones stay expired.
    ///
    /// [`spawn_persist`]: MetadataCache::spawn_persist
    pub async fn load_persisted<S: DocumentStore>(
        &self,
        store: &S,
        document: &str,
    ) -> protoshelf_storage::StorageResult<usize> {
        let entries: Vec<PersistedEntry> = store.read(document).await?.unwrap_or_default();
        let count = entries.len();
        for entry in entries {
            self.prototypes
                .insert_at(entry.path, entry.is_prototype, entry.last_update);
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protoshelf_storage::MemoryStore;
    use protoshelf_util::ManualClock;

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Utc::now()))
    }

    #[test]
    fn test_entry_expires_after_ttl() {
        let clock = clock();
        let cache: TtlCache<&str, u32> = TtlCache::new(Duration::seconds(5), clock.clone());

        cache.insert("a", 1);
        clock.advance(Duration::milliseconds(4_999));
        assert_eq!(cache.get(&"a"), Some(1));

        clock.advance(Duration::milliseconds(1));
        assert_eq!(cache.get(&"a"), None);
    }

    #[test]
    fn test_invalidate_touches_path_and_parent() {
        let cache = MetadataCache::new(Duration::seconds(5), clock());
        let parent = PathBuf::from("/srv/demos");
        let child = parent.join("alpha");
        let sibling = parent.join("beta");

        cache.put_prototype(&parent, false);
        cache.put_prototype(&child, true);
        cache.put_prototype(&sibling, true);
        cache.put_children(&parent, vec![]);

        cache.invalidate(&child);

        assert_eq!(cache.prototype(&child), None);
        assert_eq!(cache.prototype(&parent), None);
        assert!(cache.children(&parent).is_none());
        assert_eq!(cache.prototype(&sibling), Some(true));
    }

    #[tokio::test]
    async fn test_persist_and_reload() {
        let clock = clock();
        let store = Arc::new(MemoryStore::new());
        let cache = MetadataCache::new(Duration::seconds(5), clock.clone());
        cache.put_prototype(Path::new("/srv/demos/alpha"), true);

        cache
            .spawn_persist(Arc::clone(&store), "metadata-cache")
            .await
            .unwrap();

        let reloaded = MetadataCache::new(Duration::seconds(5), clock.clone());
        let count = reloaded
            .load_persisted(store.as_ref(), "metadata-cache")
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(reloaded.prototype(Path::new("/srv/demos/alpha")), Some(true));

        // Reloaded entries age from their original write time.
        clock.advance(Duration::seconds(6));
        assert_eq!(reloaded.prototype(Path::new("/srv/demos/alpha")), None);
    }
}
