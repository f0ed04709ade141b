//! CLI command implementations.

pub mod compact;
pub mod queue;
pub mod stats;

use clap::ValueEnum;
use serde::Serialize;
use std::path::Path;
use tillsync_store::{RecordStore, StoreConfig};
use tillsync_sync::{QueueConfig, SyncQueue};
use tracing::debug;

/// Result type shared by the commands.
pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// How command output is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable lines.
    Text,
    /// Pretty-printed JSON on stdout.
    Json,
}

/// An opened database plus its outbox.
pub struct Context {
    /// Record store over the opened file.
    pub store: RecordStore,
    /// Outbox sharing the store's database.
    pub queue: SyncQueue,
    /// Requested output format.
    pub format: OutputFormat,
}

impl Context {
    /// Opens an existing database file. Never creates one.
    pub fn open(path: &Path, format: OutputFormat) -> CliResult<Self> {
        if !path.exists() {
            return Err(format!("No database found at {}", path.display()).into());
        }
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("tillsync")
            .to_string();
        debug!(path = %path.display(), %name, "opening database");
        let store = RecordStore::new(StoreConfig::new(name, path).create_if_missing(false));
        let queue = SyncQueue::for_store(&store, QueueConfig::default());
        Ok(Self {
            store,
            queue,
            format,
        })
    }

    /// Flushes the log and releases the database.
    pub async fn close(self) -> CliResult<()> {
        self.store.shutdown().await?;
        Ok(())
    }

    /// Prints `value` as JSON, or `text` otherwise.
    pub fn emit<T: Serialize>(&self, value: &T, text: impl FnOnce() -> String) -> CliResult<()> {
        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
            OutputFormat::Text => println!("{}", text()),
        }
        Ok(())
    }
}
