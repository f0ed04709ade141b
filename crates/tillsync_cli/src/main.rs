//! TillSync CLI
//!
//! Maintenance tools for a till's local database and sync outbox.
//!
//! # Commands
//!
//! - `stats` - Database and outbox statistics
//! - `pending` / `failed` - List outbox entries awaiting replay or parked
//! - `retry` - Reset failed entries to pending
//! - `remove` - Drop one outbox entry
//! - `clear-synced` - Purge synced entries
//! - `inspect` - Show one outbox entry in full
//! - `compact` - Rewrite the log to reclaim space

mod commands;

use clap::{Parser, Subcommand};
use commands::{Context, OutputFormat};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// TillSync database and outbox maintenance.
#[derive(Parser)]
#[command(name = "tillsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the database file
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    /// Output format
    #[arg(global = true, short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display database and outbox statistics
    Stats,

    /// List outbox entries waiting for replay
    Pending,

    /// List outbox entries that ran out of retries
    Failed,

    /// Reset failed entries to pending
    Retry {
        /// Entry to reset
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        id: Option<String>,

        /// Reset every failed entry
        #[arg(short, long)]
        all: bool,
    },

    /// Remove one outbox entry
    Remove {
        /// Entry to remove
        id: String,
    },

    /// Delete every synced outbox entry
    ClearSynced,

    /// Show one outbox entry
    Inspect {
        /// Entry to show
        id: String,
    },

    /// Compact the log to reclaim space
    Compact,

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let default = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Version = cli.command {
        println!("TillSync CLI v{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let path = cli.path.ok_or("Database path required (--path)")?;
    let ctx = Context::open(&path, cli.format)?;

    match cli.command {
        Commands::Stats => commands::stats::run(&ctx).await?,
        Commands::Pending => commands::queue::list_pending(&ctx).await?,
        Commands::Failed => commands::queue::list_failed(&ctx).await?,
        Commands::Retry { id, all } => commands::queue::retry(&ctx, id.as_deref(), all).await?,
        Commands::Remove { id } => commands::queue::remove(&ctx, &id).await?,
        Commands::ClearSynced => commands::queue::clear_synced(&ctx).await?,
        Commands::Inspect { id } => commands::queue::inspect(&ctx, &id).await?,
        Commands::Compact => commands::compact::run(&ctx).await?,
        Commands::Version => {}
    }

    ctx.close().await?;
    Ok(())
}
