//! Lazily opened, shareable database handle for async callers.

use crate::config::StoreConfig;
use crate::database::Database;
use crate::error::{StoreError, StoreResult};
use std::sync::Arc;
use tokio::sync::OnceCell;

struct Inner {
    config: StoreConfig,
    database: OnceCell<Arc<Database>>,
}

/// Cheaply cloneable handle to a database that is opened on first use.
///
/// Every clone shares one initialization: concurrent first callers wait on
/// the same open, and all of them observe its outcome. A failed open is not
/// remembered, so the next call tries again.
///
/// Engine work runs on tokio's blocking pool so file I/O never stalls the
/// executor.
#[derive(Clone)]
pub struct DatabaseHandle {
    inner: Arc<Inner>,
}

impl DatabaseHandle {
    /// Creates a handle; nothing is opened yet.
    pub fn new(config: StoreConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                database: OnceCell::new(),
            }),
        }
    }

    /// Returns the configuration this handle opens with.
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Returns whether the database has been opened.
    pub fn is_open(&self) -> bool {
        self.inner.database.initialized()
    }

    /// Returns the open database, opening it if needed.
    ///
    /// # Errors
    ///
    /// Returns the open error to every caller that waited on this attempt.
    pub async fn database(&self) -> StoreResult<Arc<Database>> {
        self.inner
            .database
            .get_or_try_init(|| async {
                let config = self.inner.config.clone();
                let database = tokio::task::spawn_blocking(move || Database::open(config))
                    .await
                    .map_err(|e| StoreError::TaskFailed {
                        message: e.to_string(),
                    })??;
                Ok::<_, StoreError>(Arc::new(database))
            })
            .await
            .cloned()
    }

    /// Runs `f` against the database on the blocking pool.
    ///
    /// # Errors
    ///
    /// Returns the open error, the error from `f`, or `TaskFailed` if `f`
    /// panicked.
    pub async fn run<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Database) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let database = self.database().await?;
        tokio::task::spawn_blocking(move || f(&database))
            .await
            .map_err(|e| StoreError::TaskFailed {
                message: e.to_string(),
            })?
    }

    /// Flushes the log if the database was ever opened.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the flush fails.
    pub async fn shutdown(&self) -> StoreResult<()> {
        if !self.is_open() {
            return Ok(());
        }
        self.run(|db| db.flush()).await
    }
}

impl std::fmt::Debug for DatabaseHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseHandle")
            .field("config", &self.inner.config)
            .field("open", &self.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn opens_lazily_once() {
        let handle = DatabaseHandle::new(StoreConfig::in_memory("lazy"));
        assert!(!handle.is_open());

        let clone = handle.clone();
        let (a, b) = tokio::join!(handle.database(), clone.database());
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert!(handle.is_open());
    }

    #[tokio::test]
    async fn failed_open_is_retried() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("till.db");
        let handle =
            DatabaseHandle::new(StoreConfig::new("till", &path).create_if_missing(false));

        assert!(matches!(
            handle.database().await,
            Err(StoreError::NotFound { .. })
        ));
        assert!(!handle.is_open());

        std::fs::write(&path, b"").unwrap();
        assert!(handle.database().await.is_ok());
    }

    #[tokio::test]
    async fn run_executes_on_database() {
        let handle = DatabaseHandle::new(StoreConfig::in_memory("run"));
        let key = handle
            .run(|db| db.put("customer", json!({"id": "c1", "name": "Ada"})))
            .await
            .unwrap();
        assert_eq!(key, "c1");
        assert_eq!(handle.run(|db| db.count("customer")).await.unwrap(), 1);
        handle.shutdown().await.unwrap();
    }
}
