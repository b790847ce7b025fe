//! Version records.

use crate::names::CustomNames;
use crate::tree::{BackupRecord, DirectoryNode, TreeSnapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of a version: its creation time in Unix milliseconds.
///
/// Ids are strictly increasing across the ledger.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct VersionId(pub i64);

impl VersionId {
    /// The raw millisecond value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for VersionId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(VersionId)
    }
}

/// The mutating action a version records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Rename,
    Delete,
    Upload,
    Reupload,
    Restore,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Rename => "rename",
            Action::Delete => "delete",
            Action::Upload => "upload",
            Action::Reupload => "reupload",
            Action::Restore => "restore",
        }
    }

    /// Whether this action carries uploaded file bytes.
    pub fn is_upload(&self) -> bool {
        matches!(self, Action::Upload | Action::Reupload)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file touched by an upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    /// Live location, root-relative or absolute.
    pub path: String,
    /// Root-relative location before the upload dispersed the file, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_relative_path: Option<String>,
}

impl UploadedFile {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            original_relative_path: None,
        }
    }

    pub fn with_original(mut self, original: impl Into<String>) -> Self {
        self.original_relative_path = Some(original.into());
        self
    }
}

/// Action-specific payload of a version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeDetails {
    /// Directory or file the action applied to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<UploadedFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restored_version: Option<VersionId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changes: Vec<String>,
}

impl ChangeDetails {
    pub fn for_path(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn renamed(from: impl Into<String>, to: impl Into<String>) -> Self {
        let to = to.into();
        Self {
            path: Some(to.clone()),
            from: Some(from.into()),
            to: Some(to),
            ..Default::default()
        }
    }

    pub fn uploaded(directory: impl Into<String>, files: Vec<UploadedFile>) -> Self {
        Self {
            path: Some(directory.into()),
            files,
            ..Default::default()
        }
    }

    pub fn restored(version: VersionId, changes: Vec<String>) -> Self {
        Self {
            restored_version: Some(version),
            changes,
            ..Default::default()
        }
    }

    pub fn with_display_name(mut self, name: Option<String>) -> Self {
        self.display_name = name;
        self
    }
}

/// Captured state attached to a version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionSnapshot {
    /// Full tree at record time. Absent on light deletion versions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_system: Option<TreeSnapshot>,
    /// Display names, carried only by light deletion versions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_names: Option<CustomNames>,
    /// Subtree captured immediately before a delete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory_snapshot: Option<DirectoryNode>,
    #[serde(default)]
    pub backed_files: Vec<BackupRecord>,
    pub version_id: VersionId,
}

/// One recorded mutating action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Version {
    pub id: VersionId,
    pub timestamp: DateTime<Utc>,
    pub action: Action,
    #[serde(default)]
    pub details: ChangeDetails,
    pub snapshot: VersionSnapshot,
}

impl Version {
    /// Strip the heavy snapshot for listings.
    pub fn summary(&self) -> VersionSummary {
        VersionSummary {
            id: self.id,
            timestamp: self.timestamp,
            action: self.action,
            details: self.details.clone(),
            has_snapshot: self.snapshot.file_system.is_some(),
        }
    }
}

/// A version without its snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionSummary {
    pub id: VersionId,
    pub timestamp: DateTime<Utc>,
    pub action: Action,
    pub details: ChangeDetails,
    pub has_snapshot: bool,
}

/// Most-recent-first page of version summaries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionPage {
    pub versions: Vec<VersionSummary>,
    pub total: usize,
    pub has_more: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_id_parse_and_display() {
        let id: VersionId = " 1700000000123 ".parse().unwrap();
        assert_eq!(id, VersionId(1_700_000_000_123));
        assert_eq!(id.to_string(), "1700000000123");
        assert!("abc".parse::<VersionId>().is_err());
    }

    #[test]
    fn test_action_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&Action::Reupload).unwrap(),
            "\"reupload\""
        );
        let parsed: Action = serde_json::from_str("\"restore\"").unwrap();
        assert_eq!(parsed, Action::Restore);
        assert!(Action::Upload.is_upload());
        assert!(!Action::Delete.is_upload());
    }

    #[test]
    fn test_details_skip_empty_fields() {
        let details = ChangeDetails::for_path("demos/alpha");
        let json = serde_json::to_value(&details).unwrap();
        assert_eq!(json, serde_json::json!({ "path": "demos/alpha" }));
    }

    #[test]
    fn test_summary_reports_snapshot_presence() {
        let version = Version {
            id: VersionId(1),
            timestamp: Utc::now(),
            action: Action::Delete,
            details: ChangeDetails::for_path("gone"),
            snapshot: VersionSnapshot {
                file_system: None,
                custom_names: Some(CustomNames::new()),
                directory_snapshot: None,
                backed_files: Vec::new(),
                version_id: VersionId(1),
            },
        };
        let summary = version.summary();
        assert!(!summary.has_snapshot);
        assert_eq!(summary.action, Action::Delete);
    }
}
