//! Events published by the queue and the orchestrator.

use crate::operation::{OperationType, SyncStatus};
use serde::Serialize;
use tillsync_store::EntityKind;

/// Something observable happened to the outbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    /// An operation was added.
    Enqueued {
        /// Queue entry id.
        id: String,
        /// Kind of mutation.
        op_type: OperationType,
        /// Kind of record.
        entity: EntityKind,
    },
    /// An operation changed status.
    StatusChanged {
        /// Queue entry id.
        id: String,
        /// Previous status.
        from: SyncStatus,
        /// New status.
        to: SyncStatus,
    },
    /// An operation was deleted from the queue.
    Removed {
        /// Queue entry id.
        id: String,
    },
    /// A `process_queue` run took its snapshot.
    RunStarted {
        /// Entries in the snapshot.
        pending: usize,
    },
    /// A `process_queue` run finished.
    RunFinished {
        /// Entries replayed successfully.
        synced: usize,
        /// Entries that failed.
        errors: usize,
    },
    /// A locally created record was moved to its server-assigned id.
    Reconciled {
        /// Kind of record.
        entity: EntityKind,
        /// Temporary client id.
        local_id: String,
        /// Id assigned by the server.
        server_id: String,
    },
}
