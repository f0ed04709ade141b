//! # TillSync Sync
//!
//! The outbox half of the offline write path.
//!
//! A till writes to its local [`RecordStore`](tillsync_store::RecordStore)
//! and appends the mutation to the [`SyncQueue`]. When the network is back,
//! the [`SyncOrchestrator`] drains the queue in timestamp order, replaying
//! each operation against the [`RemoteApi`] through [`fetch_with_retry`].
//! Delivery is at-least-once: an operation is only marked synced after the
//! remote accepted it.
//!
//! ## Status machine
//!
//! ```text
//! (none) --add--> pending --mark_syncing--> syncing --mark_synced--> synced
//!                    ^                         |
//!                    +--mark_error (retries)---+--mark_error (exhausted)--> error
//!                    +-------------------------retry------------------------+
//! ```
//!
//! An entry left in `syncing` by an interrupted run is moved back to
//! `pending` when the next run starts, without touching its retry count.
//! Illegal moves are rejected with [`SyncError::InvalidTransition`].
//!
//! ## Retry policy
//!
//! [`is_retryable_error`] treats transport failures, timeouts, 5xx, 408,
//! and 429 as transient. Everything else, and anything flagged
//! do-not-retry, fails immediately. Delays grow by
//! [`calculate_exponential_backoff`] without jitter.
//!
//! ## Observability
//!
//! Besides `on_retry` and `on_error` callbacks, every queue publishes
//! [`SyncEvent`]s on a broadcast channel; see [`SyncQueue::subscribe`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod api;
mod config;
mod error;
mod events;
mod operation;
mod orchestrator;
mod queue;
mod replay;
mod retry;

pub use api::{ApiError, ApiErrorKind, MemoryRemote, RemoteApi, RemoteCall};
pub use config::{OrchestratorConfig, QueueConfig, RetryConfig};
pub use error::{SyncError, SyncResult};
pub use events::SyncEvent;
pub use operation::{OperationType, SyncOperation, SyncStatus, Transition};
pub use orchestrator::{SyncOrchestrator, SyncReport};
pub use queue::{ProcessSummary, QueueStats, SyncQueue};
pub use replay::{ApiReplayer, ReplayResponse};
pub use retry::{
    calculate_exponential_backoff, fetch_with_retry, is_retryable_error, FailureSignal,
    RetryOptions,
};
