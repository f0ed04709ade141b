//! Database configuration.

use crate::schema::Schema;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Callback invoked once when the stored schema version is older than the
/// declared one. Receives `(stored_version, declared_version)`.
pub type UpgradeHook = Arc<dyn Fn(u32, u32) + Send + Sync>;

/// Where the database log lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageLocation {
    /// Ephemeral, gone when the process exits.
    Memory,
    /// A single log file; a sibling `.lock` file guards it.
    Path(PathBuf),
}

/// Configuration for opening a database.
#[derive(Clone)]
pub struct StoreConfig {
    /// Database name, recorded in the log header.
    pub name: String,
    /// Where the log is stored.
    pub location: StorageLocation,
    /// Declared schema.
    pub schema: Schema,
    /// Whether to fsync after every mutation (safer but slower).
    pub sync_on_write: bool,
    /// Dead frames tolerated before the log is compacted automatically.
    /// Zero disables automatic compaction.
    pub compact_after_dead_frames: usize,
    /// Whether to create the database file if it doesn't exist.
    pub create_if_missing: bool,
    /// Called once per version increase.
    pub on_upgrade: Option<UpgradeHook>,
}

impl StoreConfig {
    /// Creates a configuration for a file-backed database.
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            location: StorageLocation::Path(path.into()),
            ..Self::in_memory(name)
        }
    }

    /// Creates a configuration for an in-memory database.
    pub fn in_memory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            location: StorageLocation::Memory,
            schema: Schema::point_of_sale(),
            sync_on_write: true,
            compact_after_dead_frames: 4096,
            create_if_missing: true,
            on_upgrade: None,
        }
    }

    /// Sets the declared schema.
    #[must_use]
    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schema = schema;
        self
    }

    /// Sets whether to fsync after every mutation.
    #[must_use]
    pub fn sync_on_write(mut self, value: bool) -> Self {
        self.sync_on_write = value;
        self
    }

    /// Sets the automatic compaction threshold.
    #[must_use]
    pub fn compact_after_dead_frames(mut self, frames: usize) -> Self {
        self.compact_after_dead_frames = frames;
        self
    }

    /// Sets whether to create a missing database file.
    #[must_use]
    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Registers the schema upgrade hook.
    #[must_use]
    pub fn on_upgrade(mut self, hook: impl Fn(u32, u32) + Send + Sync + 'static) -> Self {
        self.on_upgrade = Some(Arc::new(hook));
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::in_memory("tillsync")
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("name", &self.name)
            .field("location", &self.location)
            .field("schema_version", &self.schema.version)
            .field("sync_on_write", &self.sync_on_write)
            .field("compact_after_dead_frames", &self.compact_after_dead_frames)
            .field("create_if_missing", &self.create_if_missing)
            .field("on_upgrade", &self.on_upgrade.is_some())
            .finish()
    }
}
