//! Configuration for the history engine.
//!
//! Configuration is loaded from multiple sources and merged:
//! 1. Global config: `~/.config/protoshelf/config.json`
//! 2. Environment variable: `PROTOSHELF_CONFIG_CONTENT`
//! 3. Project config: `protoshelf.json` or `protoshelf.jsonc` in the project root
//! 4. Environment override: `PROTOSHELF_CLEAR_SECRET`
//!
//! Files may contain `//` and `/* */` comments.

use crate::ignore::{IgnoreConfig, IgnoreRules};
use crate::ledger::{LedgerSettings, DEFAULT_MAX_VERSIONS};
use crate::{HistoryError, HistoryResult};
use chrono::Duration;
use protoshelf_util::path as paths;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const CONFIG_CONTENT_ENV: &str = "PROTOSHELF_CONFIG_CONTENT";
const CLEAR_SECRET_ENV: &str = "PROTOSHELF_CLEAR_SECRET";

/// One configuration source. Every field is optional so sources can be
/// layered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    /// Backup root, relative to the project root unless absolute.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_dir: Option<PathBuf>,

    /// Directory for the ledger, display names and cache sidecars.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ledger_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_versions: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata_ttl_secs: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ledger_ttl_secs: Option<u64>,

    /// Secret required to clear the ledger.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clear_secret: Option<String>,

    /// Landing file that marks a directory as a prototype.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_file: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignore: Option<IgnoreConfig>,
}

impl ConfigFile {
    /// Merge another source into this one (other takes precedence).
    ///
    /// Ignore lists are concatenated rather than replaced.
    pub fn merge(mut self, other: Self) -> Self {
        self.backup_dir = merge_option(self.backup_dir, other.backup_dir);
        self.data_dir = merge_option(self.data_dir, other.data_dir);
        self.ledger_name = merge_option(self.ledger_name, other.ledger_name);
        self.max_versions = merge_option(self.max_versions, other.max_versions);
        self.metadata_ttl_secs = merge_option(self.metadata_ttl_secs, other.metadata_ttl_secs);
        self.ledger_ttl_secs = merge_option(self.ledger_ttl_secs, other.ledger_ttl_secs);
        self.clear_secret = merge_option(self.clear_secret, other.clear_secret);
        self.index_file = merge_option(self.index_file, other.index_file);

        self.ignore = match (self.ignore, other.ignore) {
            (Some(mut base), Some(other)) => {
                base.names.extend(other.names);
                base.patterns.extend(other.patterns);
                base.include_hidden |= other.include_hidden;
                Some(base)
            }
            (base, None) => base,
            (None, other) => other,
        };

        self
    }

    /// Load one source from disk.
    pub async fn load_file(path: &Path) -> HistoryResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| HistoryError::io_at(path, e))?;
        Self::parse_jsonc(&content, &path.display().to_string())
    }

    /// Parse JSONC (JSON with comments).
    pub fn parse_jsonc(content: &str, source: &str) -> HistoryResult<Self> {
        let stripped = strip_comments(content);
        serde_json::from_str(&stripped)
            .map_err(|e| HistoryError::config(format!("invalid config in {source}: {e}")))
    }
}

/// Resolved engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryConfig {
    pub project_root: PathBuf,
    pub backup_dir: PathBuf,
    pub data_dir: PathBuf,
    pub ledger_name: String,
    pub max_versions: usize,
    pub metadata_ttl_secs: u64,
    pub ledger_ttl_secs: u64,
    pub clear_secret: Option<String>,
    pub index_file: String,
    pub ignore: IgnoreConfig,
}

impl HistoryConfig {
    /// Defaults for `project_root`.
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            backup_dir: PathBuf::from(".protoshelf/backups"),
            data_dir: PathBuf::from(".protoshelf/data"),
            ledger_name: "versions".to_string(),
            max_versions: DEFAULT_MAX_VERSIONS,
            metadata_ttl_secs: 5,
            ledger_ttl_secs: 10,
            clear_secret: None,
            index_file: "index.html".to_string(),
            ignore: IgnoreConfig::default(),
        }
    }

    /// Load configuration for `project_root` from all sources.
    ///
    /// Returns the config and the files that contributed to it.
    pub async fn load(project_root: &Path) -> HistoryResult<(Self, Vec<PathBuf>)> {
        Self::load_from(
            project_root,
            paths::config_dir().as_deref(),
            std::env::var(CONFIG_CONTENT_ENV).ok(),
            std::env::var(CLEAR_SECRET_ENV).ok(),
        )
        .await
    }

    async fn load_from(
        project_root: &Path,
        global_dir: Option<&Path>,
        env_content: Option<String>,
        env_secret: Option<String>,
    ) -> HistoryResult<(Self, Vec<PathBuf>)> {
        let mut file = ConfigFile::default();
        let mut sources = Vec::new();

        if let Some(dir) = global_dir {
            let path = dir.join("config.json");
            if path.exists() {
                file = file.merge(ConfigFile::load_file(&path).await?);
                sources.push(path);
            }
        }

        if let Some(content) = env_content {
            file = file.merge(ConfigFile::parse_jsonc(&content, "<env>")?);
        }

        for name in &["protoshelf.jsonc", "protoshelf.json"] {
            let path = project_root.join(name);
            if path.exists() {
                file = file.merge(ConfigFile::load_file(&path).await?);
                sources.push(path);
                break;
            }
        }

        if let Some(secret) = env_secret.filter(|s| !s.is_empty()) {
            file.clear_secret = Some(secret);
        }

        let config = Self::new(project_root).apply(file);
        tracing::debug!(
            root = %config.project_root.display(),
            sources = sources.len(),
            "Loaded configuration"
        );
        Ok((config, sources))
    }

    /// Overlay a merged source on these settings.
    pub fn apply(mut self, file: ConfigFile) -> Self {
        if let Some(dir) = file.backup_dir {
            self.backup_dir = dir;
        }
        if let Some(dir) = file.data_dir {
            self.data_dir = dir;
        }
        if let Some(name) = file.ledger_name {
            self.ledger_name = name;
        }
        if let Some(max) = file.max_versions {
            self.max_versions = max.max(1);
        }
        if let Some(secs) = file.metadata_ttl_secs {
            self.metadata_ttl_secs = secs;
        }
        if let Some(secs) = file.ledger_ttl_secs {
            self.ledger_ttl_secs = secs;
        }
        if file.clear_secret.is_some() {
            self.clear_secret = file.clear_secret;
        }
        if let Some(index) = file.index_file {
            self.index_file = index;
        }
        if let Some(ignore) = file.ignore {
            self.ignore.names.extend(ignore.names);
            self.ignore.patterns.extend(ignore.patterns);
            self.ignore.include_hidden |= ignore.include_hidden;
        }
        self
    }

    /// Resolve a relative `project_root` against the current directory.
    pub fn with_absolute_root(mut self) -> HistoryResult<Self> {
        let root = paths::absolute(&self.project_root)
            .map_err(|e| HistoryError::io_at(&self.project_root, e))?;
        self.project_root = root;
        Ok(self)
    }

    /// Absolute backup root.
    pub fn backup_root(&self) -> PathBuf {
        paths::normalize(&self.project_root.join(&self.backup_dir))
    }

    /// Absolute sidecar directory.
    pub fn data_root(&self) -> PathBuf {
        paths::normalize(&self.project_root.join(&self.data_dir))
    }

    /// Ignore rules for tree walks: the configured rules plus the backup
    /// and sidecar directories when they live inside the project root.
    pub fn ignore_rules(&self) -> HistoryResult<IgnoreRules> {
        let mut rules = IgnoreRules::from_config(&self.ignore)?;
        for dir in [self.backup_root(), self.data_root()] {
            if let Some(relative) = paths::root_relative(&self.project_root, &dir) {
                rules = rules.with_excluded_path(relative);
            }
        }
        Ok(rules)
    }

    pub fn ledger_settings(&self) -> LedgerSettings {
        LedgerSettings {
            max_versions: self.max_versions,
            read_ttl: Duration::seconds(self.ledger_ttl_secs as i64),
            clear_secret: self.clear_secret.clone(),
        }
    }

    pub fn metadata_ttl(&self) -> Duration {
        Duration::seconds(self.metadata_ttl_secs as i64)
    }
}

/// Merge two Option values.
fn merge_option<T>(base: Option<T>, other: Option<T>) -> Option<T> {
    match (base, other) {
        (_, Some(o)) => Some(o),
        (b, None) => b,
    }
}

/// Strip JSON comments, leaving string contents intact.
fn strip_comments(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;
    let mut escape_next = false;

    while let Some(c) = chars.next() {
        if escape_next {
            result.push(c);
            escape_next = false;
            continue;
        }

        if in_string {
            match c {
                '\\' => escape_next = true,
                '"' => in_string = false,
                _ => {}
            }
            result.push(c);
            continue;
        }

        let next = chars.peek().copied();
        match (c, next) {
            ('"', _) => {
                in_string = true;
                result.push(c);
            }
            ('/', Some('/')) => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        result.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = ' ';
                for c in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        break;
                    }
                    if c == '\n' {
                        result.push('\n');
                    }
                    prev = c;
                }
            }
            _ => result.push(c),
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_strip_comments() {
        let input = r#"{
            // line comment
            "clear_secret": "a//b", /* block */
            "index_file": "home.html" // trailing
        }"#;
        let stripped = strip_comments(input);
        assert!(!stripped.contains("line comment"));
        assert!(!stripped.contains("block"));
        assert!(!stripped.contains("trailing"));
        assert!(stripped.contains("a//b"));
    }

    #[test]
    fn test_parse_jsonc() {
        let file = ConfigFile::parse_jsonc(
            r#"{
                // keep fewer versions
                "max_versions": 20,
                "ignore": { "names": ["node_modules"], "patterns": ["*.tmp"] }
            }"#,
            "test",
        )
        .unwrap();
        assert_eq!(file.max_versions, Some(20));
        assert_eq!(file.ignore.unwrap().names, vec!["node_modules".to_string()]);
    }

    #[test]
    fn test_parse_invalid_is_config_error() {
        let result = ConfigFile::parse_jsonc("{ not json", "broken.json");
        assert!(matches!(result, Err(HistoryError::Config(msg)) if msg.contains("broken.json")));
    }

    #[test]
    fn test_merge_prefers_later_source() {
        let base = ConfigFile {
            max_versions: Some(50),
            index_file: Some("index.htm".into()),
            ignore: Some(IgnoreConfig {
                names: vec!["dist".into()],
                ..Default::default()
            }),
            ..Default::default()
        };
        let other = ConfigFile {
            max_versions: Some(10),
            ignore: Some(IgnoreConfig {
                names: vec!["node_modules".into()],
                include_hidden: true,
                ..Default::default()
            }),
            ..Default::default()
        };

        let merged = base.merge(other);
        assert_eq!(merged.max_versions, Some(10));
        assert_eq!(merged.index_file.as_deref(), Some("index.htm"));
        let ignore = merged.ignore.unwrap();
        assert_eq!(ignore.names, vec!["dist", "node_modules"]);
        assert!(ignore.include_hidden);
    }

    #[test]
    fn test_defaults() {
        let config = HistoryConfig::new("/srv/demos");
        assert_eq!(config.backup_root(), PathBuf::from("/srv/demos/.protoshelf/backups"));
        assert_eq!(config.max_versions, 100);
        assert_eq!(config.metadata_ttl(), Duration::seconds(5));
        assert_eq!(config.ledger_settings().read_ttl, Duration::seconds(10));
        assert!(config.clear_secret.is_none());
    }

    #[test]
    fn test_ignore_rules_exclude_visible_backup_dir() {
        let mut config = HistoryConfig::new("/srv/demos");
        config.backup_dir = PathBuf::from("_history");
        let rules = config.ignore_rules().unwrap();
        assert!(rules.is_ignored("_history", "_history"));
        assert!(!rules.is_ignored("site", "site"));
    }

    #[test]
    fn test_include_hidden_still_skips_sidecars() {
        let mut config = HistoryConfig::new("/srv/demos");
        config.ignore.include_hidden = true;
        let rules = config.ignore_rules().unwrap();
        assert!(!rules.is_ignored(".well-known", "site/.well-known"));
        assert!(rules.is_ignored("backups", ".protoshelf/backups"));
        assert!(rules.is_ignored("data", ".protoshelf/data"));
    }

    #[tokio::test]
    async fn test_load_layers_sources() {
        let global = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        std::fs::write(
            global.path().join("config.json"),
            r#"{ "max_versions": 30, "clear_secret": "global" }"#,
        )
        .unwrap();
        std::fs::write(
            project.path().join("protoshelf.json"),
            r#"{ "max_versions": 40 }"#,
        )
        .unwrap();

        let (config, sources) = HistoryConfig::load_from(
            project.path(),
            Some(global.path()),
            Some(r#"{ "index_file": "start.html" }"#.to_string()),
            Some("from-env".to_string()),
        )
        .await
        .unwrap();

        assert_eq!(sources.len(), 2);
        assert_eq!(config.max_versions, 40);
        assert_eq!(config.index_file, "start.html");
        assert_eq!(config.clear_secret.as_deref(), Some("from-env"));
        assert_eq!(config.project_root, project.path());
    }

    #[tokio::test]
    async fn test_load_without_sources_uses_defaults() {
        let project = TempDir::new().unwrap();
        let (config, sources) = HistoryConfig::load_from(project.path(), None, None, None)
            .await
            .unwrap();
        assert!(sources.is_empty());
        assert_eq!(config, HistoryConfig::new(project.path()));
    }
}
