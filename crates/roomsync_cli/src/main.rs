//! roomsync CLI
//!
//! Operator tools for the on-disk cache of one roomsync account.
//!
//! # Commands
//!
//! - `inspect` - Display cache statistics and the rooms it holds
//! - `timeline` - Print the cached timeline of a room
//! - `members` - Search a room's member index by name prefix
//! - `verify` - Replay both logs and report torn or corrupt tails
//! - `compact` - Rewrite both logs as snapshots

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// roomsync account cache tools.
#[derive(Parser)]
#[command(name = "roomsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the account directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display cache statistics and the rooms it holds
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print the cached timeline of a room
    Timeline {
        /// Room id
        room: String,

        /// Print only the latest N events
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Search a room's member index by name prefix
    Members {
        /// Room id
        room: String,

        /// Display name or user id prefix (empty lists everyone)
        #[arg(default_value = "")]
        prefix: String,
    },

    /// Replay both logs and report torn or corrupt tails
    Verify,

    /// Rewrite both logs as snapshots
    Compact {
        /// Dry run - show sizes only
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Account path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Timeline { room, limit } => {
            let path = cli.path.ok_or("Account path required for timeline")?;
            commands::timeline::run(&path, &room, limit)?;
        }
        Commands::Members { room, prefix } => {
            let path = cli.path.ok_or("Account path required for members")?;
            commands::members::run(&path, &room, &prefix)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Account path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Compact { dry_run } => {
            let path = cli.path.ok_or("Account path required for compact")?;
            commands::compact::run(&path, dry_run)?;
        }
        Commands::Version => {
            println!("roomsync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!(
                "Log format v{} ({})",
                roomsync_store::LOG_VERSION,
                String::from_utf8_lossy(&roomsync_store::LOG_MAGIC)
            );
        }
    }

    Ok(())
}
