//! Database engine: recovery, mutations, queries, and compaction.

use crate::collection::Collection;
use crate::config::{StorageLocation, StoreConfig};
use crate::error::{StoreError, StoreResult};
use crate::key::IndexValue;
use crate::lock::DatabaseLock;
use crate::log::{decode_log, encode_frame, LogEntry};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use tillsync_storage::{FileBackend, InMemoryBackend, StorageBackend};
use tracing::{debug, info, warn};

/// Statistics for one collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionStats {
    /// Collection name.
    pub name: String,
    /// Number of stored documents.
    pub documents: usize,
    /// Declared index names.
    pub indexes: Vec<String>,
}

/// Statistics for a whole database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseStats {
    /// Database name.
    pub name: String,
    /// Schema version in effect.
    pub version: u32,
    /// Size of the log in bytes.
    pub log_bytes: u64,
    /// Frames in the log.
    pub frames: usize,
    /// Frames superseded by later writes.
    pub dead_frames: usize,
    /// Per-collection statistics, sorted by name.
    pub collections: Vec<CollectionStats>,
}

/// Outcome of a compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CompactionStats {
    /// Log size before compaction.
    pub bytes_before: u64,
    /// Log size after compaction.
    pub bytes_after: u64,
    /// Frames dropped.
    pub frames_dropped: usize,
}

struct State {
    collections: HashMap<String, Collection>,
    version: u32,
    frames: usize,
}

impl State {
    fn documents(&self) -> usize {
        self.collections.values().map(Collection::len).sum()
    }

    fn dead_frames(&self) -> usize {
        // One live header frame plus one frame per document.
        self.frames.saturating_sub(self.documents() + 1)
    }

    fn collection(&self, name: &str) -> StoreResult<&Collection> {
        self.collections
            .get(name)
            .ok_or_else(|| StoreError::unknown_collection(name))
    }

    fn collection_mut(&mut self, name: &str) -> StoreResult<&mut Collection> {
        self.collections
            .get_mut(name)
            .ok_or_else(|| StoreError::unknown_collection(name))
    }
}

/// An open local database.
///
/// `Database` is the synchronous storage engine. Documents live in memory,
/// keyed by primary key and indexed by every declared secondary index; every
/// mutation is first appended to the log as one checksummed frame, so a
/// single-document write is atomic and survives a crash once it returns.
///
/// Writers are serialized. Readers never block on the log.
///
/// Most callers should go through [`DatabaseHandle`](crate::DatabaseHandle),
/// which opens the database lazily and runs operations off the async
/// executor.
pub struct Database {
    config: StoreConfig,
    state: RwLock<State>,
    backend: Mutex<Box<dyn StorageBackend>>,
    _lock: Option<DatabaseLock>,
}

impl Database {
    /// Opens the database described by `config`, recovering from its log.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - another process holds the database (`DatabaseLocked`)
    /// - the file is missing and `create_if_missing` is false (`NotFound`)
    /// - the log was written by a newer schema (`VersionDowngrade`)
    /// - the log is damaged before its tail (`Corruption`)
    pub fn open(config: StoreConfig) -> StoreResult<Self> {
        match config.location.clone() {
            StorageLocation::Memory => {
                Self::open_with_backend(config, Box::new(InMemoryBackend::new()))
            }
            StorageLocation::Path(path) => {
                if !path.exists() && !config.create_if_missing {
                    return Err(StoreError::NotFound {
                        path: path.display().to_string(),
                    });
                }
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent)?;
                    }
                }
                let lock = DatabaseLock::acquire(&path)?;
                debug!(lock = %lock.path().display(), "database lock acquired");
                let backend = FileBackend::open(&path)?;
                let mut db = Self::open_with_backend(config, Box::new(backend))?;
                db._lock = Some(lock);
                Ok(db)
            }
        }
    }

    /// Opens a database over an existing backend. No file lock is taken.
    ///
    /// # Errors
    ///
    /// Same as [`open`](Self::open), minus the locking errors.
    pub fn open_with_backend(
        config: StoreConfig,
        mut backend: Box<dyn StorageBackend>,
    ) -> StoreResult<Self> {
        let bytes = backend.read_all()?;
        let replay = decode_log(&bytes)?;
        if replay.torn {
            warn!(
                name = %config.name,
                valid_len = replay.valid_len,
                discarded = bytes.len() as u64 - replay.valid_len,
                "discarding torn log tail"
            );
            backend.truncate(replay.valid_len)?;
        }

        let mut state = State {
            collections: config
                .schema
                .collections
                .iter()
                .map(|schema| (schema.name.clone(), Collection::new(schema.clone())))
                .collect(),
            version: config.schema.version,
            frames: 0,
        };

        let mut stored_version = None;
        for (offset, entry) in replay.entries {
            state.frames += 1;
            match entry {
                LogEntry::Header { version, .. } => stored_version = Some(version),
                LogEntry::Put {
                    collection,
                    document,
                } => match state.collections.get_mut(&collection) {
                    Some(c) => {
                        let key = c.key_of(&document).map_err(|e| {
                            StoreError::corruption(offset, format!("unkeyed document: {e}"))
                        })?;
                        c.apply_put(key, document);
                    }
                    None => warn!(%collection, offset, "skipping put for undeclared collection"),
                },
                LogEntry::Delete { collection, key } => {
                    if let Some(c) = state.collections.get_mut(&collection) {
                        c.apply_delete(&key);
                    }
                }
                LogEntry::Clear { collection } => {
                    if let Some(c) = state.collections.get_mut(&collection) {
                        c.apply_clear();
                    }
                }
                LogEntry::Rekey {
                    collection,
                    old_key,
                    document,
                } => match state.collections.get_mut(&collection) {
                    Some(c) => {
                        let key = c.key_of(&document).map_err(|e| {
                            StoreError::corruption(offset, format!("unkeyed document: {e}"))
                        })?;
                        c.apply_rekey(&old_key, key, document);
                    }
                    None => warn!(%collection, offset, "skipping rekey for undeclared collection"),
                },
            }
        }

        let db = Self {
            state: RwLock::new(state),
            backend: Mutex::new(backend),
            _lock: None,
            config,
        };

        let declared = db.config.schema.version;
        match stored_version {
            Some(stored) if stored > declared => {
                return Err(StoreError::VersionDowngrade { stored, declared });
            }
            Some(stored) if stored == declared => {}
            Some(stored) => {
                info!(name = %db.config.name, stored, declared, "upgrading schema");
                if let Some(hook) = &db.config.on_upgrade {
                    hook(stored, declared);
                }
                db.write_header()?;
            }
            None => db.write_header()?,
        }

        info!(
            name = %db.config.name,
            version = declared,
            documents = db.state.read().documents(),
            "database opened"
        );
        Ok(db)
    }

    /// Returns the database name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Returns the schema version in effect.
    pub fn version(&self) -> u32 {
        self.state.read().version
    }

    /// Returns the declared collection names, sorted.
    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.read().collections.keys().cloned().collect();
        names.sort();
        names
    }

    /// Point lookup by primary key.
    ///
    /// # Errors
    ///
    /// Returns `UnknownCollection` for an undeclared collection.
    pub fn get(&self, collection: &str, key: &str) -> StoreResult<Option<Value>> {
        Ok(self.state.read().collection(collection)?.get(key).cloned())
    }

    /// Upserts `document`, returning its primary key.
    ///
    /// # Errors
    ///
    /// Returns `MissingKey` if the document has no primary key and
    /// `UniqueViolation` if it collides on a unique index; in both cases
    /// nothing is written.
    pub fn put(&self, collection: &str, document: Value) -> StoreResult<String> {
        let mut state = self.state.write();
        let c = state.collection(collection)?;
        let key = c.key_of(&document)?;
        c.validate(&key, &document)?;

        let entry = LogEntry::Put {
            collection: collection.to_string(),
            document,
        };
        self.append(&mut state, &entry)?;
        if let LogEntry::Put { document, .. } = entry {
            state.collection_mut(collection)?.apply_put(key.clone(), document);
        }
        self.maybe_compact(&mut state);
        Ok(key)
    }

    /// Read-modify-write of one document under the writer lock.
    ///
    /// `f` receives the current document and returns its replacement, or
    /// `None` to leave it untouched. Returns the stored document afterwards,
    /// or `None` if `key` does not exist.
    ///
    /// # Errors
    ///
    /// Propagates errors from `f`. Returns `InvalidRecord` if the
    /// replacement changes the primary key.
    pub fn modify<F>(&self, collection: &str, key: &str, f: F) -> StoreResult<Option<Value>>
    where
        F: FnOnce(&Value) -> StoreResult<Option<Value>>,
    {
        let mut state = self.state.write();
        let c = state.collection(collection)?;
        let Some(current) = c.get(key) else {
            return Ok(None);
        };
        let Some(replacement) = f(current)? else {
            return Ok(Some(current.clone()));
        };
        if c.key_of(&replacement)? != key {
            return Err(StoreError::invalid_record(format!(
                "modify may not change the key of {key} in {collection}"
            )));
        }
        c.validate(key, &replacement)?;

        let entry = LogEntry::Put {
            collection: collection.to_string(),
            document: replacement.clone(),
        };
        self.append(&mut state, &entry)?;
        state
            .collection_mut(collection)?
            .apply_put(key.to_string(), replacement.clone());
        self.maybe_compact(&mut state);
        Ok(Some(replacement))
    }

    /// Moves a document to a new primary key as one logged mutation.
    ///
    /// `f` receives the current document and returns it carrying its new
    /// key. A document already stored under the new key is replaced.
    /// Returns the new key, or `None` if `old_key` does not exist.
    ///
    /// # Errors
    ///
    /// Propagates errors from `f`. Returns `UniqueViolation` if the moved
    /// document collides with any other document; nothing is written then.
    pub fn rekey<F>(&self, collection: &str, old_key: &str, f: F) -> StoreResult<Option<String>>
    where
        F: FnOnce(&Value) -> StoreResult<Value>,
    {
        let mut state = self.state.write();
        let c = state.collection(collection)?;
        let Some(current) = c.get(old_key) else {
            return Ok(None);
        };
        let document = f(current)?;
        let new_key = c.key_of(&document)?;
        c.validate_move(old_key, &new_key, &document)?;

        let entry = LogEntry::Rekey {
            collection: collection.to_string(),
            old_key: old_key.to_string(),
            document,
        };
        self.append(&mut state, &entry)?;
        if let LogEntry::Rekey { document, .. } = entry {
            state
                .collection_mut(collection)?
                .apply_rekey(old_key, new_key.clone(), document);
        }
        self.maybe_compact(&mut state);
        Ok(Some(new_key))
    }

    /// Removes a document. Returns whether it existed; a missing key is not
    /// an error and writes nothing.
    ///
    /// # Errors
    ///
    /// Returns `UnknownCollection` or a storage error.
    pub fn delete(&self, collection: &str, key: &str) -> StoreResult<bool> {
        let mut state = self.state.write();
        if !state.collection(collection)?.contains(key) {
            return Ok(false);
        }
        self.append(
            &mut state,
            &LogEntry::Delete {
                collection: collection.to_string(),
                key: key.to_string(),
            },
        )?;
        state.collection_mut(collection)?.apply_delete(key);
        self.maybe_compact(&mut state);
        Ok(true)
    }

    /// Removes every document of a collection, returning how many there were.
    ///
    /// # Errors
    ///
    /// Returns `UnknownCollection` or a storage error.
    pub fn clear(&self, collection: &str) -> StoreResult<usize> {
        let mut state = self.state.write();
        if state.collection(collection)?.len() == 0 {
            return Ok(0);
        }
        self.append(
            &mut state,
            &LogEntry::Clear {
                collection: collection.to_string(),
            },
        )?;
        let removed = state.collection_mut(collection)?.apply_clear();
        self.maybe_compact(&mut state);
        Ok(removed)
    }

    /// Returns every document of a collection, in no particular order.
    ///
    /// # Errors
    ///
    /// Returns `UnknownCollection` for an undeclared collection.
    pub fn get_all(&self, collection: &str) -> StoreResult<Vec<Value>> {
        Ok(self
            .state
            .read()
            .collection(collection)?
            .documents()
            .cloned()
            .collect())
    }

    /// Exact-match lookup on a secondary index.
    ///
    /// # Errors
    ///
    /// Returns `UnknownCollection` or `UnknownIndex`.
    pub fn query_index(
        &self,
        collection: &str,
        index: &str,
        value: &IndexValue,
    ) -> StoreResult<Vec<Value>> {
        self.state.read().collection(collection)?.lookup(index, value)
    }

    /// Inclusive range scan on a secondary index, in index order.
    ///
    /// # Errors
    ///
    /// Returns `UnknownCollection` or `UnknownIndex`.
    pub fn query_range(
        &self,
        collection: &str,
        index: &str,
        low: &IndexValue,
        high: &IndexValue,
    ) -> StoreResult<Vec<Value>> {
        self.state
            .read()
            .collection(collection)?
            .range(index, low, high)
    }

    /// Number of documents in a collection.
    ///
    /// # Errors
    ///
    /// Returns `UnknownCollection` for an undeclared collection.
    pub fn count(&self, collection: &str) -> StoreResult<usize> {
        Ok(self.state.read().collection(collection)?.len())
    }

    /// Forces the log to durable storage.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the sync fails.
    pub fn flush(&self) -> StoreResult<()> {
        self.backend.lock().sync()?;
        Ok(())
    }

    /// Rewrites the log as a snapshot of the live documents.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be written; the old log is
    /// then left in place.
    pub fn compact(&self) -> StoreResult<CompactionStats> {
        let mut state = self.state.write();
        self.compact_locked(&mut state)
    }

    /// Returns statistics about the database.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the log size cannot be read.
    pub fn stats(&self) -> StoreResult<DatabaseStats> {
        let state = self.state.read();
        let log_bytes = self.backend.lock().size()?;
        let mut collections: Vec<CollectionStats> = state
            .collections
            .values()
            .map(|c| CollectionStats {
                name: c.name().to_string(),
                documents: c.len(),
                indexes: c.index_names(),
            })
            .collect();
        collections.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(DatabaseStats {
            name: self.config.name.clone(),
            version: state.version,
            log_bytes,
            frames: state.frames,
            dead_frames: state.dead_frames(),
            collections,
        })
    }

    fn write_header(&self) -> StoreResult<()> {
        let mut state = self.state.write();
        let entry = LogEntry::Header {
            name: self.config.name.clone(),
            version: self.config.schema.version,
        };
        self.append(&mut state, &entry)?;
        state.version = self.config.schema.version;
        Ok(())
    }

    /// Appends one frame; rolls the log back if it cannot be made durable.
    fn append(&self, state: &mut State, entry: &LogEntry) -> StoreResult<()> {
        let frame = encode_frame(entry)?;
        let mut backend = self.backend.lock();
        let offset = backend.append(&frame)?;
        if self.config.sync_on_write {
            if let Err(e) = backend.sync() {
                let _ = backend.truncate(offset);
                return Err(e.into());
            }
        }
        state.frames += 1;
        Ok(())
    }

    fn maybe_compact(&self, state: &mut State) {
        let threshold = self.config.compact_after_dead_frames;
        if threshold == 0 {
            return;
        }
        let dead = state.dead_frames();
        if dead >= threshold && dead > state.documents() {
            if let Err(e) = self.compact_locked(state) {
                warn!(name = %self.config.name, error = %e, "automatic compaction failed");
            }
        }
    }

    fn compact_locked(&self, state: &mut State) -> StoreResult<CompactionStats> {
        let mut snapshot = encode_frame(&LogEntry::Header {
            name: self.config.name.clone(),
            version: state.version,
        })?;
        let mut frames = 1;

        let mut names: Vec<&String> = state.collections.keys().collect();
        names.sort();
        for name in names {
            for document in state.collections[name].documents() {
                snapshot.extend(encode_frame(&LogEntry::Put {
                    collection: name.clone(),
                    document: document.clone(),
                })?);
                frames += 1;
            }
        }

        let mut backend = self.backend.lock();
        let bytes_before = backend.size()?;
        backend.replace(&snapshot)?;
        let stats = CompactionStats {
            bytes_before,
            bytes_after: snapshot.len() as u64,
            frames_dropped: state.frames.saturating_sub(frames),
        };
        state.frames = frames;

        info!(
            name = %self.config.name,
            bytes_before = stats.bytes_before,
            bytes_after = stats.bytes_after,
            "log compacted"
        );
        Ok(stats)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.config.name)
            .field("location", &self.config.location)
            .field("version", &self.version())
            .finish()
    }
}
