//! Version history command handlers.
//!
//! Handles listing, showing, restoring and clearing versions.

use chrono::Local;
use clap::Subcommand;
use protoshelf_history::{Version, VersionId, VersionSummary, Workspace};

/// History subcommands.
#[derive(Subcommand)]
pub enum HistoryCommands {
    /// List recent versions, newest first
    List {
        /// Maximum number of versions to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
        /// Print output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one version
    Show {
        /// Version ID
        id: VersionId,
    },
    /// Roll the tree back to a version
    Restore {
        /// Version ID
        id: VersionId,
    },
    /// Delete all versions and their backups
    Clear {
        /// Shared secret configured as `clear_secret`
        #[arg(long)]
        credential: String,
    },
}

/// Handle history commands.
pub async fn handle_history(command: HistoryCommands, workspace: &Workspace) -> anyhow::Result<()> {
    match command {
        HistoryCommands::List { limit, json } => {
            let page = workspace.list_versions(limit).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&page)?);
            } else if page.versions.is_empty() {
                println!("No versions recorded.");
            } else {
                println!("{:<15} {:<10} {:<20} {:<30}", "ID", "ACTION", "TIME", "TARGET");
                println!("{}", "-".repeat(78));
                for version in &page.versions {
                    print_summary_row(version);
                }
                if page.has_more {
                    println!();
                    println!("Showing {} of {} versions.", page.versions.len(), page.total);
                }
            }
        }
        HistoryCommands::Show { id } => {
            let version = workspace.version(id).await?;
            print_version(&version);
        }
        HistoryCommands::Restore { id } => {
            let report = workspace.restore(id).await?;
            if report.restored.is_empty() {
                println!("Nothing to restore: tree already matches version {id}.");
            } else {
                println!("Restored version {id}:");
                for item in &report.restored {
                    println!("  {item}");
                }
            }
            if !report.errors.is_empty() {
                eprintln!("{} step(s) failed:", report.errors.len());
                for error in &report.errors {
                    eprintln!("  {error}");
                }
            }
            if let Some(recorded) = report.restore_version {
                println!("Recorded as version {recorded}.");
            }
        }
        HistoryCommands::Clear { credential } => {
            let removed = workspace.clear_history(&credential).await?;
            println!("Cleared {removed} version(s).");
        }
    }

    Ok(())
}

fn target_of(details: &protoshelf_history::ChangeDetails) -> String {
    match (&details.from, &details.to, &details.restored_version) {
        (Some(from), Some(to), _) => format!("{from} -> {to}"),
        (_, _, Some(restored)) => format!("version {restored}"),
        _ => details.path.clone().unwrap_or_else(|| "/".to_string()),
    }
}

fn print_summary_row(version: &VersionSummary) {
    let time = version
        .timestamp
        .with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S");
    let mut target = target_of(&version.details);
    if target.chars().count() > 30 {
        target = format!("{}...", target.chars().take(27).collect::<String>());
    }
    let marker = if version.has_snapshot { "" } else { " (no snapshot)" };
    println!(
        "{:<15} {:<10} {:<20} {}{}",
        version.id.to_string(),
        version.action.as_str(),
        time.to_string(),
        target,
        marker
    );
}

fn print_version(version: &Version) {
    println!("Version: {}", version.id);
    println!("Action: {}", version.action);
    println!(
        "Time: {}",
        version.timestamp.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
    );
    println!("Target: {}", target_of(&version.details));
    if let Some(name) = &version.details.display_name {
        println!("Display name: {name}");
    }

    let snapshot = &version.snapshot;
    match &snapshot.file_system {
        Some(tree) => println!(
            "Snapshot: {} files in {} directories",
            tree.directories.file_count(),
            tree.directories.flatten_dirs().len()
        ),
        None => println!("Snapshot: none (cannot be restored)"),
    }
    if let Some(subtree) = &snapshot.directory_snapshot {
        println!("Deleted subtree: {}", subtree.relative_path);
    }
    if !snapshot.backed_files.is_empty() {
        println!("Backed up files:");
        for record in &snapshot.backed_files {
            println!("  {}", record.relative_path);
        }
    }
    if !version.details.changes.is_empty() {
        println!("Changes:");
        for change in &version.details.changes {
            println!("  {change}");
        }
    }
}
