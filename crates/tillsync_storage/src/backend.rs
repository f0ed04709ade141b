//! Storage backend trait definition.

use crate::error::StorageResult;

/// An append-only byte log.
///
/// The local database writes one framed record per mutation with
/// [`append`](Self::append), replays the whole log with
/// [`read_all`](Self::read_all) when it opens, cuts off a torn tail with
/// [`truncate`](Self::truncate), and swaps in a compacted snapshot with
/// [`replace`](Self::replace).
///
/// # Invariants
///
/// - `append` returns the offset the data starts at, which equals the size
///   before the call
/// - `read_all` returns every byte appended since the last `replace` or
///   `truncate`, in order
/// - after `sync` returns, all appended data survives process termination
/// - `replace` is all-or-nothing: a crash leaves either the old or the new
///   contents, never a mix
pub trait StorageBackend: Send + Sync {
    /// Reads the entire log.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn read_all(&self) -> StorageResult<Vec<u8>>;

    /// Appends data to the end of the log, returning its starting offset.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Forces appended data and file metadata to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Returns the current size of the log in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Drops everything after `new_size`.
    ///
    /// Used to discard a partially written record found during replay.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::TruncatePastEnd`] if `new_size` is larger
    /// than the log.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Atomically replaces the whole log with `data`.
    ///
    /// # Errors
    ///
    /// Returns an error if the new contents cannot be written durably.
    fn replace(&mut self, data: &[u8]) -> StorageResult<()>;
}
