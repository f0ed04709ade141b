//! Error types for the sync layer.

use crate::api::ApiError;
use crate::operation::SyncStatus;
use crate::retry::FailureSignal;
use thiserror::Error;
use tillsync_store::StoreError;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while queueing or replaying operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Local store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Remote API failure.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// A queue entry could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// The requested status change is not allowed from the entry's status.
    #[error("operation {id}: cannot {event} while {from}")]
    InvalidTransition {
        /// Queue entry id.
        id: String,
        /// Status the entry was in.
        from: SyncStatus,
        /// Rejected event.
        event: &'static str,
    },

    /// Another `process_queue` run is active on this queue.
    #[error("queue is already being processed")]
    AlreadyRunning,
}

impl SyncError {
    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec(message.into())
    }

    /// Returns true if retrying the failed call may succeed.
    pub fn is_retryable(&self) -> bool {
        crate::retry::is_retryable_error(self, None)
    }
}

impl FailureSignal for SyncError {
    fn no_retry(&self) -> bool {
        match self {
            Self::Api(e) => e.no_retry(),
            _ => false,
        }
    }

    fn is_transport(&self) -> bool {
        matches!(self, Self::Api(e) if e.is_transport())
    }

    fn is_timeout(&self) -> bool {
        matches!(self, Self::Api(e) if e.is_timeout())
    }

    fn status(&self) -> Option<u16> {
        match self {
            Self::Api(e) => e.status(),
            _ => None,
        }
    }
}
