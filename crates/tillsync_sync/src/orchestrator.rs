//! Local write path and sync passes.

use crate::api::RemoteApi;
use crate::config::{OrchestratorConfig, QueueConfig};
use crate::error::{SyncError, SyncResult};
use crate::events::SyncEvent;
use crate::operation::{OperationType, SyncOperation};
use crate::queue::{ProcessSummary, SyncQueue};
use crate::replay::ApiReplayer;
use crate::retry::RetryOptions;
use serde::Serialize;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tillsync_store::{EntityKind, Record, RecordStore};
use tracing::{info, warn};

/// Outcome of one [`SyncOrchestrator::sync_once`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Operations accepted by the remote.
    pub synced: usize,
    /// Operations that failed this pass.
    pub errors: usize,
    /// Operations left for a later pass behind a failed one.
    pub deferred: usize,
    /// Records moved from a temporary id to a server id.
    pub reconciled: usize,
    /// Synced entries deleted from the queue.
    pub purged: usize,
}

/// Ties the record store, the outbox, and the remote together.
///
/// Local writes go to the store first and are then enqueued, so the till
/// sees its own changes immediately. [`sync_once`](Self::sync_once) drains
/// the outbox against the remote.
pub struct SyncOrchestrator<A: RemoteApi> {
    store: RecordStore,
    queue: SyncQueue,
    replayer: ApiReplayer<A>,
    config: OrchestratorConfig,
}

impl<A: RemoteApi> SyncOrchestrator<A> {
    /// Creates an orchestrator with its queue in the store's database.
    pub fn new(store: RecordStore, api: Arc<A>, config: OrchestratorConfig) -> Self {
        let queue = SyncQueue::for_store(&store, QueueConfig::default());
        Self::with_queue(store, queue, api, config)
    }

    /// Creates an orchestrator over an existing queue.
    pub fn with_queue(
        store: RecordStore,
        queue: SyncQueue,
        api: Arc<A>,
        config: OrchestratorConfig,
    ) -> Self {
        let replayer = ApiReplayer::new(api, RetryOptions::new(config.retry.clone()));
        Self {
            store,
            queue,
            replayer,
            config,
        }
    }

    /// Returns the record store.
    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Returns the outbox.
    pub fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    /// Stores a record created on this till and enqueues its CREATE.
    ///
    /// The record's id is treated as temporary until the remote assigns
    /// one.
    pub async fn create(&self, kind: EntityKind, record: &Record) -> SyncResult<String> {
        self.store.put(kind, record).await?;
        self.queue
            .add(
                OperationType::Create,
                kind,
                record.to_document(),
                Some(record.id.clone()),
            )
            .await
    }

    /// Stores a modified record and enqueues its UPDATE.
    pub async fn update(&self, kind: EntityKind, record: &Record) -> SyncResult<String> {
        self.store.put(kind, record).await?;
        self.queue
            .add(OperationType::Update, kind, record.to_document(), None)
            .await
    }

    /// Deletes a record locally and enqueues its DELETE.
    pub async fn delete(&self, kind: EntityKind, id: &str) -> SyncResult<String> {
        self.store.delete(kind, id).await?;
        self.queue
            .add(OperationType::Delete, kind, json!({ "id": id }), None)
            .await
    }

    /// Drains the outbox once.
    ///
    /// Each pending operation is replayed through the retry policy. When a
    /// CREATE comes back with a different id, the local record is moved to
    /// that id and the record's later queued operations are rewritten before
    /// they are replayed. Synced entries are purged afterwards if
    /// configured.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyRunning` if a pass is already active, or a store
    /// error if the queue cannot be read. Failed operations are counted,
    /// not returned.
    pub async fn sync_once(&self) -> SyncResult<SyncReport> {
        let reconciled = AtomicUsize::new(0);
        let summary: ProcessSummary = self
            .queue
            .process_queue_with(
                |op| self.replay_one(op, &reconciled),
                |op: &SyncOperation, error: &SyncError| {
                    warn!(id = %op.id, entity = %op.entity, retries = op.retries + 1, error = %error, "sync failed");
                },
            )
            .await?;

        let purged = if self.config.purge_synced {
            self.queue.clear_synced().await?
        } else {
            0
        };

        let report = SyncReport {
            synced: summary.synced,
            errors: summary.errors,
            deferred: summary.deferred,
            reconciled: reconciled.load(Ordering::SeqCst),
            purged,
        };
        info!(
            synced = report.synced,
            errors = report.errors,
            reconciled = report.reconciled,
            purged = report.purged,
            "sync pass complete"
        );
        Ok(report)
    }

    async fn replay_one(&self, op: SyncOperation, reconciled: &AtomicUsize) -> SyncResult<()> {
        let response = self.replayer.replay(&op).await?;

        let (Some(local_id), Some(server_id)) = (&op.local_id, &response.server_id) else {
            return Ok(());
        };
        if op.op_type != OperationType::Create || local_id == server_id {
            return Ok(());
        }

        self.store.rekey(op.entity, local_id, server_id).await?;
        self.queue
            .remap_record_id(op.entity, local_id, server_id)
            .await?;
        reconciled.fetch_add(1, Ordering::SeqCst);
        info!(entity = %op.entity, %local_id, %server_id, "record reconciled");
        self.queue.emit(SyncEvent::Reconciled {
            entity: op.entity,
            local_id: local_id.clone(),
            server_id: server_id.clone(),
        });
        Ok(())
    }
}

impl<A: RemoteApi> std::fmt::Debug for SyncOrchestrator<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("queue", &self.queue)
            .field("config", &self.config)
            .finish()
    }
}
