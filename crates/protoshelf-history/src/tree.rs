//! Directory tree snapshot data structures.

use crate::names::CustomNames;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// Metadata of one regular file at capture time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub name: String,
    pub absolute_path: PathBuf,
    /// Root-relative, forward-slash path.
    pub relative_path: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
}

/// One directory and everything captured beneath it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryNode {
    pub name: String,
    pub absolute_path: PathBuf,
    /// Root-relative, forward-slash path. Empty for the project root.
    pub relative_path: String,
    /// Whether the directory holds the landing file that makes it a prototype.
    pub has_index: bool,
    #[serde(default)]
    pub files: Vec<FileRecord>,
    #[serde(default)]
    pub subdirectories: Vec<DirectoryNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
}

impl DirectoryNode {
    /// All directories strictly below this node, keyed by relative path.
    pub fn flatten_dirs(&self) -> BTreeMap<String, &DirectoryNode> {
        let mut out = BTreeMap::new();
        let mut stack: Vec<&DirectoryNode> = self.subdirectories.iter().collect();
        while let Some(node) = stack.pop() {
            out.insert(node.relative_path.clone(), node);
            stack.extend(node.subdirectories.iter());
        }
        out
    }

    /// All files at or below this node, keyed by relative path.
    pub fn flatten_files(&self) -> BTreeMap<String, &FileRecord> {
        let mut out = BTreeMap::new();
        let mut stack: Vec<&DirectoryNode> = vec![self];
        while let Some(node) = stack.pop() {
            for file in &node.files {
                out.insert(file.relative_path.clone(), file);
            }
            stack.extend(node.subdirectories.iter());
        }
        out
    }

    /// Every relative path (directories and files) below this node.
    pub fn relative_paths(&self) -> BTreeSet<String> {
        self.flatten_dirs()
            .into_keys()
            .chain(self.flatten_files().into_keys())
            .collect()
    }

    /// Total number of files in the subtree.
    pub fn file_count(&self) -> usize {
        self.files.len()
            + self
                .subdirectories
                .iter()
                .map(DirectoryNode::file_count)
                .sum::<usize>()
    }
}

/// A full capture of the project tree plus the display names in effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeSnapshot {
    pub directories: DirectoryNode,
    #[serde(default)]
    pub custom_names: CustomNames,
    pub timestamp: DateTime<Utc>,
}

/// Where one file's bytes were copied for a version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRecord {
    pub original_absolute_path: PathBuf,
    /// Root-relative location of the file when it was backed up.
    pub relative_path: String,
    pub backup_absolute_path: PathBuf,
    /// Root-relative location the file had before an upload dispersed it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_relative_path: Option<String>,
}
