//! Path utilities.
//!
//! Every path that reaches the filesystem must first be shown to resolve
//! inside the project root; the helpers here do that check and produce the
//! forward-slash, root-relative form stored in snapshots.

use std::path::{Component, Path, PathBuf};

/// Get the protoshelf configuration directory.
///
/// This follows XDG conventions on Linux/macOS:
/// - `$XDG_CONFIG_HOME/protoshelf` if set
/// - `~/.config/protoshelf` otherwise
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("protoshelf"))
}

/// Get the protoshelf logs directory.
pub fn logs_dir() -> Option<PathBuf> {
    dirs::data_local_dir().map(|p| p.join("protoshelf").join("logs"))
}

/// Check if a path is within a base directory.
///
/// Both sides are canonicalized when they exist so symlinks cannot be used
/// to step outside `base`.
pub fn is_within(path: &Path, base: &Path) -> bool {
    let canonical_path = path.canonicalize().ok();
    let canonical_base = base.canonicalize().ok();

    match (canonical_path, canonical_base) {
        (Some(p), Some(b)) => p.starts_with(&b),
        _ => normalize(path).starts_with(normalize(base)),
    }
}

/// Normalize a path by removing `.` and `..` components.
///
/// Unlike `canonicalize`, this doesn't require the path to exist. A `..`
/// with nothing left to cancel is kept on relative paths and dropped at
/// the filesystem root.
pub fn normalize(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();

    for component in path.components() {
        match component {
            Component::ParentDir => match result.components().next_back() {
                Some(Component::Normal(_)) => {
                    result.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => result.push(".."),
            },
            Component::CurDir => {}
            _ => result.push(component),
        }
    }

    result
}

/// Make a path absolute against the current directory, then normalize it.
///
/// The path does not need to exist.
pub fn absolute(path: &Path) -> std::io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(normalize(path))
    } else {
        Ok(normalize(&std::env::current_dir()?.join(path)))
    }
}

/// Make a path relative to a base directory.
///
/// Returns `None` if the path is not within the base directory.
pub fn relative_to(path: &Path, base: &Path) -> Option<PathBuf> {
    path.strip_prefix(base).ok().map(|p| p.to_path_buf())
}

/// Render a relative path with `/` separators regardless of platform.
pub fn to_slash(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Resolve a caller-supplied path against `root`.
///
/// Relative paths are joined onto `root`; absolute paths are taken as-is.
/// Returns `None` when the result would land outside `root`. The root
/// itself is accepted.
pub fn resolve_inside(root: &Path, candidate: &Path) -> Option<PathBuf> {
    let root = normalize(root);
    let joined = if candidate.is_absolute() {
        normalize(candidate)
    } else {
        normalize(&root.join(candidate))
    };

    if !joined.starts_with(&root) {
        return None;
    }

    // Existing paths get the symlink-aware check as well.
    if joined.exists() && !is_within(&joined, &root) {
        return None;
    }

    Some(joined)
}

/// The root-relative, forward-slash form of an absolute path under `root`.
pub fn root_relative(root: &Path, absolute: &Path) -> Option<String> {
    relative_to(&normalize(absolute), &normalize(root)).map(|p| to_slash(&p))
}
