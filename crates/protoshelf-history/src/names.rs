//! Custom display names for directories.
//!
//! The browse surface shows a display name in place of the directory name
//! when one is set. The mapping is keyed by root-relative path, persisted as
//! a single document, and is part of every full snapshot so restores bring
//! it back too.

use crate::HistoryResult;
use protoshelf_storage::DocumentStore;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Root-relative path -> display name.
pub type CustomNames = BTreeMap<String, String>;

/// Persistent store of display names.
pub struct NameStore<S> {
    store: Arc<S>,
    document: String,
}

impl<S> Clone for NameStore<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            document: self.document.clone(),
        }
    }
}

impl<S: DocumentStore> NameStore<S> {
    pub fn new(store: Arc<S>, document: impl Into<String>) -> Self {
        Self {
            store,
            document: document.into(),
        }
    }

    /// The current mapping (empty if none saved yet).
    pub async fn load(&self) -> HistoryResult<CustomNames> {
        Ok(self.store.read(&self.document).await?.unwrap_or_default())
    }

    pub async fn get(&self, path: &str) -> HistoryResult<Option<String>> {
        Ok(self.load().await?.get(path).cloned())
    }

    /// Set or clear the display name of `path`.
    pub async fn set(&self, path: &str, name: Option<String>) -> HistoryResult<CustomNames> {
        let path = path.to_string();
        Ok(self
            .store
            .update(&self.document, move |names: &mut CustomNames| match name {
                Some(name) => {
                    names.insert(path, name);
                }
                None => {
                    names.remove(&path);
                }
            })
            .await?)
    }

    /// Drop `path` and every entry beneath it.
    pub async fn remove_tree(&self, path: &str) -> HistoryResult<CustomNames> {
        let path = path.to_string();
        Ok(self
            .store
            .update(&self.document, move |names: &mut CustomNames| {
                names.retain(|key, _| !is_same_or_below(key, &path));
            })
            .await?)
    }

    /// Re-key entries after `from` was renamed to `to`.
    pub async fn rename_prefix(&self, from: &str, to: &str) -> HistoryResult<CustomNames> {
        let (from, to) = (from.to_string(), to.to_string());
        Ok(self
            .store
            .update(&self.document, move |names: &mut CustomNames| {
                let moved: Vec<(String, String)> = names
                    .iter()
                    .filter(|(key, _)| is_same_or_below(key, &from))
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect();
                for (key, value) in moved {
                    names.remove(&key);
                    let suffix = &key[from.len()..];
                    names.insert(format!("{to}{suffix}"), value);
                }
            })
            .await?)
    }

    /// Overwrite the whole mapping.
    pub async fn replace_all(&self, names: CustomNames) -> HistoryResult<()> {
        self.store.write(&self.document, &names).await?;
        Ok(())
    }
}

pub(crate) fn is_same_or_below(key: &str, path: &str) -> bool {
    key == path
        || key
            .strip_prefix(path)
            .is_some_and(|rest| rest.starts_with('/'))
}
