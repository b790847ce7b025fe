//! Protoshelf - versioned shelf of static demo sites.
//!
//! This is the operator CLI: every mutating command is recorded in the
//! version history and can be rolled back with `history restore`.

mod commands;

use clap::{Parser, Subcommand};
use commands::{HistoryCommands, TreeCommand};
use protoshelf_history::{HistoryConfig, Workspace};
use protoshelf_util::log::{self, LogConfig, LogLevel};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "protoshelf")]
#[command(author, version, about = "Versioned shelf of static demo sites", long_about = None)]
struct Cli {
    /// Project root holding the demo tree (defaults to the current directory)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Write logs to this file instead of the default location
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect, restore or clear recorded versions
    History {
        #[command(subcommand)]
        command: HistoryCommands,
    },
    #[command(flatten)]
    Tree(TreeCommand),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_file.clone());

    let root = match cli.root {
        Some(root) => protoshelf_util::path::absolute(&root)?,
        None => std::env::current_dir()?,
    };
    let (config, sources) = HistoryConfig::load(&root).await?;
    for source in &sources {
        tracing::debug!(path = %source.display(), "Using config file");
    }

    let workspace = Workspace::open(config).await?;

    match cli.command {
        Commands::History { command } => commands::handle_history(command, &workspace).await,
        Commands::Tree(command) => commands::handle_tree(command, &workspace).await,
    }
}

/// Log to a file always, and to stderr when verbose.
fn init_logging(verbose: bool, log_file: Option<PathBuf>) {
    let config = LogConfig {
        print: verbose,
        level: if verbose {
            LogLevel::Debug
        } else {
            LogLevel::Info
        },
        include_location: verbose,
        file: log_file.or_else(log::default_log_path),
    };

    if let Err(e) = log::init(config) {
        eprintln!("Warning: Could not set up log file: {}", e);
    }
}
