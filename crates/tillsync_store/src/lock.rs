//! Single-process guard for a database file.
//!
//! The log at `<path>` is guarded by an advisory lock on `<path>.lock`.
//! Only one process at a time may hold it; the lock is released when the
//! [`DatabaseLock`] is dropped.

use crate::error::{StoreError, StoreResult};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Holds the exclusive lock on a database file.
#[derive(Debug)]
pub(crate) struct DatabaseLock {
    path: PathBuf,
    file: File,
}

impl DatabaseLock {
    /// Acquires the lock guarding `db_path` without blocking.
    pub(crate) fn acquire(db_path: &Path) -> StoreResult<Self> {
        let path = lock_path(db_path);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        if file.try_lock_exclusive().is_err() {
            return Err(StoreError::DatabaseLocked);
        }

        Ok(Self { path, file })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DatabaseLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn lock_path(db_path: &Path) -> PathBuf {
    let mut name = db_path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn second_lock_fails_until_released() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("till.db");

        let first = DatabaseLock::acquire(&db).unwrap();
        assert!(first.path().ends_with("till.db.lock"));
        assert!(matches!(
            DatabaseLock::acquire(&db),
            Err(StoreError::DatabaseLocked)
        ));

        drop(first);
        assert!(DatabaseLock::acquire(&db).is_ok());
    }
}
