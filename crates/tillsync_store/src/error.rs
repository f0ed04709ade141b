//! Error types for the local record store.

use std::io;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in the local record store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] tillsync_storage::StorageError),

    /// I/O error outside the backend (lock file, directories).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A document could not be encoded for the log.
    #[error("encoding failed: {message}")]
    Encode {
        /// Description of the failure.
        message: String,
    },

    /// A log frame or document could not be decoded.
    #[error("decoding failed: {message}")]
    Decode {
        /// Description of the failure.
        message: String,
    },

    /// The log is damaged somewhere other than its tail.
    #[error("log corruption at offset {offset}: {message}")]
    Corruption {
        /// Byte offset of the damaged frame.
        offset: u64,
        /// Description of the damage.
        message: String,
    },

    /// The collection is not declared in the schema.
    #[error("unknown collection: {name}")]
    UnknownCollection {
        /// Collection name.
        name: String,
    },

    /// The index is not declared on the collection.
    #[error("unknown index {index} on collection {collection}")]
    UnknownIndex {
        /// Collection name.
        collection: String,
        /// Index name.
        index: String,
    },

    /// A document lacks a usable primary key.
    #[error("document in {collection} has no usable key at `{key_path}`")]
    MissingKey {
        /// Collection name.
        collection: String,
        /// Key path declared for the collection.
        key_path: String,
    },

    /// A put would store two documents under the same unique index value.
    #[error("unique index {index} on {collection} already holds {value}")]
    UniqueViolation {
        /// Collection name.
        collection: String,
        /// Index name.
        index: String,
        /// The conflicting value, rendered for humans.
        value: String,
    },

    /// The database on disk was written by a newer schema.
    #[error("database schema version {stored} is newer than declared version {declared}")]
    VersionDowngrade {
        /// Version found in the log.
        stored: u32,
        /// Version declared by this build.
        declared: u32,
    },

    /// Another process has the database open.
    #[error("database locked: another process has exclusive access")]
    DatabaseLocked,

    /// The database file does not exist and creation was disabled.
    #[error("database not found: {path}")]
    NotFound {
        /// Expected location.
        path: String,
    },

    /// A document does not have the shape of a record.
    #[error("invalid record: {message}")]
    InvalidRecord {
        /// Description of the problem.
        message: String,
    },

    /// A blocking storage task panicked or was cancelled.
    #[error("storage task failed: {message}")]
    TaskFailed {
        /// Description of the failure.
        message: String,
    },
}

impl StoreError {
    /// Creates an encoding error.
    pub fn encode(message: impl Into<String>) -> Self {
        Self::Encode {
            message: message.into(),
        }
    }

    /// Creates a decoding error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Creates a corruption error.
    pub fn corruption(offset: u64, message: impl Into<String>) -> Self {
        Self::Corruption {
            offset,
            message: message.into(),
        }
    }

    /// Creates an unknown collection error.
    pub fn unknown_collection(name: impl Into<String>) -> Self {
        Self::UnknownCollection { name: name.into() }
    }

    /// Creates an invalid record error.
    pub fn invalid_record(message: impl Into<String>) -> Self {
        Self::InvalidRecord {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = StoreError::VersionDowngrade {
            stored: 3,
            declared: 2,
        };
        assert_eq!(
            err.to_string(),
            "database schema version 3 is newer than declared version 2"
        );

        let err = StoreError::UniqueViolation {
            collection: "product".into(),
            index: "by_sku".into(),
            value: "\"SKU-1\"".into(),
        };
        assert!(err.to_string().contains("by_sku"));
        assert!(err.to_string().contains("SKU-1"));
    }
}
