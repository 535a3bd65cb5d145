//! zonesync CLI
//!
//! Maintenance tools for the files a zonesync engine keeps on disk.
//!
//! # Commands
//!
//! - `inspect-changes` - List pending and queued change-log entries
//! - `show-cursor` - Display committed cursors per zone
//! - `reset-cursor` - Forget a zone's cursor so the next pass pulls everything

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use commands::inspect_changes::EntryFilter;
use commands::{CHANGE_LOG_FILE, CURSOR_FILE};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// zonesync maintenance tools.
#[derive(Parser)]
#[command(name = "zonesync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the sync data directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Which {
    All,
    Queued,
    Pending,
}

impl From<Which> for EntryFilter {
    fn from(which: Which) -> Self {
        match which {
            Which::All => EntryFilter::All,
            Which::Queued => EntryFilter::Queued,
            Which::Pending => EntryFilter::Unqueued,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List change-log entries
    InspectChanges {
        /// Which entries to list
        #[arg(short, long, value_enum, default_value = "all")]
        which: Which,

        /// Maximum number of entries to list
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Display committed cursors
    ShowCursor {
        /// Only show this zone
        #[arg(short, long)]
        zone: Option<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Forget a zone's cursor, forcing a full pull on the next pass
    ResetCursor {
        /// Zone whose cursor to forget
        #[arg(short, long)]
        zone: String,
    },

    /// Show version information
    Version,
}

fn data_file(path: Option<&Path>, name: &str, command: &str) -> Result<PathBuf, String> {
    path.map(|dir| dir.join(name))
        .ok_or_else(|| format!("Data directory required for {command}"))
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

    let path = cli.path.as_deref();
    match cli.command {
        Commands::InspectChanges {
            which,
            limit,
            format,
        } => {
            let file = data_file(path, CHANGE_LOG_FILE, "inspect-changes")?;
            commands::inspect_changes::run(&file, which.into(), limit, &format)?;
        }
        Commands::ShowCursor { zone, format } => {
            let file = data_file(path, CURSOR_FILE, "show-cursor")?;
            commands::cursor::show(&file, zone.as_deref(), &format)?;
        }
        Commands::ResetCursor { zone } => {
            let file = data_file(path, CURSOR_FILE, "reset-cursor")?;
            commands::cursor::reset(&file, &zone)?;
        }
        Commands::Version => {
            println!("zonesync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!(
                "change log format v{}",
                zonesync_protocol::FORMAT_VERSION
            );
        }
    }

    Ok(())
}
