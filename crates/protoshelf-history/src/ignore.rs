//! Ignore predicate for tree walks.

use crate::{HistoryError, HistoryResult};
use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Version-control internals that are never part of a demo tree.
pub const VCS_DIRS: &[&str] = &[".git", ".svn", ".hg"];

/// User-facing ignore settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IgnoreConfig {
    /// Exact entry names to skip anywhere in the tree.
    pub names: Vec<String>,
    /// Glob patterns matched against the root-relative path.
    pub patterns: Vec<String>,
    /// Keep dot-prefixed entries such as `.well-known`.
    pub include_hidden: bool,
}

/// Decides which entries the snapshot builder skips.
///
/// An entry is ignored when its name is in the name set, when it is
/// dot-prefixed (unless hidden entries are allowed), when its relative path
/// sits under an excluded prefix, or when any glob pattern matches.
#[derive(Debug, Clone)]
pub struct IgnoreRules {
    names: HashSet<String>,
    prefixes: Vec<String>,
    patterns: Vec<Pattern>,
    skip_hidden: bool,
}

impl Default for IgnoreRules {
    fn default() -> Self {
        Self {
            names: VCS_DIRS.iter().map(|s| s.to_string()).collect(),
            prefixes: Vec::new(),
            patterns: Vec::new(),
            skip_hidden: true,
        }
    }
}

impl IgnoreRules {
    /// The fixed deny-list only.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build rules from configuration on top of the fixed deny-list.
    pub fn from_config(config: &IgnoreConfig) -> HistoryResult<Self> {
        let mut rules = Self::default();
        for name in &config.names {
            rules = rules.with_name(name);
        }
        for pattern in &config.patterns {
            rules = rules.with_pattern(pattern)?;
        }
        if config.include_hidden {
            rules = rules.allow_hidden();
        }
        Ok(rules)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.names.insert(name.into());
        self
    }

    /// Skip a root-relative path and everything beneath it.
    pub fn with_excluded_path(mut self, relative: impl Into<String>) -> Self {
        let relative = relative.into().trim_matches('/').to_string();
        if !relative.is_empty() {
            self.prefixes.push(relative);
        }
        self
    }

    pub fn with_pattern(mut self, pattern: &str) -> HistoryResult<Self> {
        let compiled = Pattern::new(pattern)
            .map_err(|e| HistoryError::config(format!("bad ignore pattern {pattern:?}: {e}")))?;
        self.patterns.push(compiled);
        Ok(self)
    }

    pub fn allow_hidden(mut self) -> Self {
        self.skip_hidden = false;
        self
    }

    /// Whether the entry `name` at root-relative `relative_path` is skipped.
    pub fn is_ignored(&self, name: &str, relative_path: &str) -> bool {
        if self.skip_hidden && name.starts_with('.') {
            return true;
        }
        if self.names.contains(name) {
            return true;
        }
        if self.prefixes.iter().any(|prefix| {
            relative_path == prefix
                || relative_path
                    .strip_prefix(prefix.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        }) {
            return true;
        }
        self.patterns.iter().any(|p| p.matches(relative_path))
    }
}
