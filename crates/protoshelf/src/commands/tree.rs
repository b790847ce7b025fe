//! Demo tree command handlers.
//!
//! Each mutating command records one version.

use anyhow::Context;
use clap::Subcommand;
use protoshelf_history::{UploadFile, Version, Workspace};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Tree subcommands.
#[derive(Subcommand)]
pub enum TreeCommand {
    /// Create a directory
    Mkdir {
        /// Path relative to the project root
        path: String,
    },
    /// Rename or move a file or directory
    Rename { from: String, to: String },
    /// Delete a file or directory (restorable from history)
    Rm { path: String },
    /// Copy local files or directories into a demo directory
    Upload {
        /// Target directory relative to the project root
        dir: String,
        /// Local files or directories to upload
        #[arg(required = true)]
        sources: Vec<PathBuf>,
    },
    /// Replace a demo directory's contents with local files
    Reupload {
        dir: String,
        #[arg(required = true)]
        sources: Vec<PathBuf>,
    },
    /// Set or clear a directory's display name
    Name {
        path: String,
        /// New display name; omit to clear
        name: Option<String>,
    },
    /// List a directory
    Ls {
        #[arg(default_value = "")]
        path: String,
    },
}

/// Handle tree commands.
pub async fn handle_tree(command: TreeCommand, workspace: &Workspace) -> anyhow::Result<()> {
    match command {
        TreeCommand::Mkdir { path } => {
            let version = workspace.create_dir(&path).await?;
            report("Created", &path, &version);
        }
        TreeCommand::Rename { from, to } => {
            let version = workspace.rename(&from, &to).await?;
            report("Renamed", &format!("{from} -> {to}"), &version);
        }
        TreeCommand::Rm { path } => {
            let version = workspace.delete(&path).await?;
            report("Deleted", &path, &version);
        }
        TreeCommand::Upload { dir, sources } => {
            let files = collect_uploads(&sources).await?;
            let count = files.len();
            let version = workspace.upload(&dir, files).await?;
            report("Uploaded", &format!("{count} file(s) to {dir}"), &version);
        }
        TreeCommand::Reupload { dir, sources } => {
            let files = collect_uploads(&sources).await?;
            let count = files.len();
            let version = workspace.reupload(&dir, files).await?;
            report("Replaced", &format!("{dir} with {count} file(s)"), &version);
        }
        TreeCommand::Name { path, name } => {
            let version = workspace.set_display_name(&path, name).await?;
            report("Renamed display of", &path, &version);
        }
        TreeCommand::Ls { path } => {
            let children = workspace.list_children(&path).await?;
            if children.is_empty() {
                println!("(empty)");
            }
            for child in children {
                let kind = match (child.is_dir, child.is_prototype) {
                    (true, true) => "demo",
                    (true, false) => "dir",
                    _ => "file",
                };
                match child.display_name {
                    Some(display) => println!("{:<5} {}  ({})", kind, child.name, display),
                    None => println!("{:<5} {}", kind, child.name),
                }
            }
        }
    }

    Ok(())
}

fn report(verb: &str, what: &str, version: &Version) {
    println!("{verb} {what} (version {})", version.id);
}

/// Read local sources into upload entries. Directories keep their inner
/// layout; plain files land at the top of the target.
async fn collect_uploads(sources: &[PathBuf]) -> anyhow::Result<Vec<UploadFile>> {
    let mut files = Vec::new();
    for source in sources {
        if source.is_dir() {
            for (path, relative) in walk_files(source)? {
                let contents = tokio::fs::read(&path)
                    .await
                    .with_context(|| format!("reading {}", path.display()))?;
                files.push(UploadFile::new(relative, contents));
            }
        } else {
            let name = source
                .file_name()
                .with_context(|| format!("{} has no file name", source.display()))?
                .to_string_lossy()
                .into_owned();
            let contents = tokio::fs::read(source)
                .await
                .with_context(|| format!("reading {}", source.display()))?;
            files.push(UploadFile::new(name, contents));
        }
    }
    Ok(files)
}

fn walk_files(dir: &Path) -> anyhow::Result<Vec<(PathBuf, String)>> {
    let mut found = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.with_context(|| format!("walking {}", dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(dir)
            .with_context(|| format!("{} escaped {}", entry.path().display(), dir.display()))?;
        let relative = protoshelf_util::path::to_slash(relative);
        found.push((entry.into_path(), relative));
    }
    Ok(found)
}
