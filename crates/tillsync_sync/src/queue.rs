//! Durable outbox of operations waiting to be replayed.

use crate::config::QueueConfig;
use crate::error::{SyncError, SyncResult};
use crate::events::SyncEvent;
use crate::operation::{OperationType, SyncOperation, SyncStatus, Transition};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tillsync_store::{
    now_millis, DatabaseHandle, EntityKind, IndexValue, RecordStore, StoreError, StoreResult,
    SYNC_QUEUE,
};
use tokio::sync::{broadcast, OnceCell};
use tracing::{debug, info, warn};

/// Counts of queue entries by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// All entries.
    pub total: usize,
    /// Waiting for replay.
    pub pending: usize,
    /// Being replayed.
    pub syncing: usize,
    /// Accepted by the remote, not yet purged.
    pub synced: usize,
    /// Out of retries.
    pub error: usize,
}

/// Outcome of one `process_queue` run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessSummary {
    /// Entries replayed successfully.
    pub synced: usize,
    /// Entries whose replay failed.
    pub errors: usize,
    /// Entries left pending because an earlier operation on the same
    /// record failed in this run.
    pub deferred: usize,
}

struct Inner {
    handle: DatabaseHandle,
    config: QueueConfig,
    next_seq: OnceCell<AtomicU64>,
    running: AtomicBool,
    events: broadcast::Sender<SyncEvent>,
}

/// The outbox: an ordered, persisted queue of mutations.
///
/// Entries live in the `sync_queue` collection of the local database, so
/// they survive restarts. Replay order is ascending `timestamp`, ties broken
/// by enqueue order. Every status change is a read-modify-write of the
/// stored entry.
///
/// Clones share one queue.
#[derive(Clone)]
pub struct SyncQueue {
    inner: Arc<Inner>,
}

impl SyncQueue {
    /// Creates a queue persisted through `handle`.
    pub fn new(handle: DatabaseHandle, config: QueueConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                handle,
                config,
                next_seq: OnceCell::new(),
                running: AtomicBool::new(false),
                events,
            }),
        }
    }

    /// Creates a queue in the same database as `store`.
    pub fn for_store(store: &RecordStore, config: QueueConfig) -> Self {
        Self::new(store.handle().clone(), config)
    }

    /// Returns the configuration.
    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    /// Subscribes to queue events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    pub(crate) fn emit(&self, event: SyncEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    /// Enqueues an operation stamped with the current time.
    pub async fn add(
        &self,
        op_type: OperationType,
        entity: EntityKind,
        data: Value,
        local_id: Option<String>,
    ) -> SyncResult<String> {
        self.add_with_timestamp(op_type, entity, data, local_id, now_millis())
            .await
    }

    /// Enqueues an operation with an explicit logical timestamp.
    pub async fn add_with_timestamp(
        &self,
        op_type: OperationType,
        entity: EntityKind,
        data: Value,
        local_id: Option<String>,
        timestamp: i64,
    ) -> SyncResult<String> {
        let mut op = SyncOperation::new(
            op_type,
            entity,
            data,
            timestamp,
            self.inner.config.max_retries,
        )
        .with_local_id(local_id);
        op.seq = self.next_seq().await?;

        let document = op.to_document()?;
        self.inner
            .handle
            .run(move |db| db.put(SYNC_QUEUE, document))
            .await?;

        debug!(id = %op.id, %op_type, %entity, "operation enqueued");
        self.emit(SyncEvent::Enqueued {
            id: op.id.clone(),
            op_type,
            entity,
        });
        Ok(op.id)
    }

    /// Returns one entry.
    pub async fn get(&self, id: &str) -> SyncResult<Option<SyncOperation>> {
        let key = id.to_string();
        let document = self
            .inner
            .handle
            .run(move |db| db.get(SYNC_QUEUE, &key))
            .await?;
        document
            .as_ref()
            .map(SyncOperation::from_document)
            .transpose()
    }

    /// Returns every entry in replay order.
    pub async fn get_all(&self) -> SyncResult<Vec<SyncOperation>> {
        self.load(None).await
    }

    /// Returns the oldest pending entry.
    pub async fn get_next(&self) -> SyncResult<Option<SyncOperation>> {
        Ok(self.get_pending().await?.into_iter().next())
    }

    /// Returns pending entries in replay order.
    pub async fn get_pending(&self) -> SyncResult<Vec<SyncOperation>> {
        self.load(Some(SyncStatus::Pending)).await
    }

    /// Returns entries parked in `error`.
    pub async fn get_failed(&self) -> SyncResult<Vec<SyncOperation>> {
        self.load(Some(SyncStatus::Error)).await
    }

    /// Returns every entry for one kind of record, any status.
    pub async fn get_by_entity(&self, entity: EntityKind) -> SyncResult<Vec<SyncOperation>> {
        let documents = self
            .inner
            .handle
            .run(move |db| {
                db.query_index(SYNC_QUEUE, "by_entity", &IndexValue::from(entity.as_str()))
            })
            .await?;
        decode_sorted(&documents)
    }

    /// `pending -> syncing`. Returns the updated entry, or `None` (with a
    /// warning) if it does not exist.
    pub async fn mark_syncing(&self, id: &str) -> SyncResult<Option<SyncOperation>> {
        self.apply(id, Transition::BeginSync).await
    }

    /// `syncing -> synced`. Marking a synced entry again, or a missing one,
    /// does nothing.
    pub async fn mark_synced(&self, id: &str) -> SyncResult<()> {
        self.apply(id, Transition::Succeed).await.map(|_| ())
    }

    /// Records a failed replay: `syncing -> pending` with one more retry
    /// counted, or `syncing -> error` once the ceiling is reached.
    pub async fn mark_error(
        &self,
        id: &str,
        message: impl Into<String>,
    ) -> SyncResult<Option<SyncOperation>> {
        self.apply(id, Transition::Fail(message.into())).await
    }

    /// `error -> pending`, resetting retries. Returns whether the entry
    /// exists.
    pub async fn retry(&self, id: &str) -> SyncResult<bool> {
        Ok(self.apply(id, Transition::Retry).await?.is_some())
    }

    /// Retries every entry in `error`, returning how many were reset.
    pub async fn retry_all(&self) -> SyncResult<usize> {
        let mut reset = 0;
        for op in self.get_failed().await? {
            match self.retry(&op.id).await {
                Ok(true) => reset += 1,
                Ok(false) | Err(SyncError::InvalidTransition { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(reset)
    }

    /// Deletes an entry regardless of status. Returns whether it existed.
    pub async fn remove(&self, id: &str) -> SyncResult<bool> {
        let key = id.to_string();
        let removed = self
            .inner
            .handle
            .run(move |db| db.delete(SYNC_QUEUE, &key))
            .await?;
        if removed {
            debug!(%id, "operation removed");
            self.emit(SyncEvent::Removed { id: id.to_string() });
        } else {
            debug!(%id, "remove of unknown operation ignored");
        }
        Ok(removed)
    }

    /// Deletes every synced entry, returning how many were deleted.
    pub async fn clear_synced(&self) -> SyncResult<usize> {
        let removed = self
            .inner
            .handle
            .run(|db| {
                let synced = db.query_index(
                    SYNC_QUEUE,
                    "by_status",
                    &IndexValue::from(SyncStatus::Synced.as_str()),
                )?;
                let mut removed = Vec::with_capacity(synced.len());
                for document in synced {
                    let id = decode(&document)?.id;
                    if db.delete(SYNC_QUEUE, &id)? {
                        removed.push(id);
                    }
                }
                Ok(removed)
            })
            .await?;

        if !removed.is_empty() {
            info!(count = removed.len(), "synced operations purged");
        }
        let count = removed.len();
        for id in removed {
            self.emit(SyncEvent::Removed { id });
        }
        Ok(count)
    }

    /// Returns entries left in `syncing` by an interrupted run to
    /// `pending`, returning how many were recovered.
    ///
    /// Every run does this before taking its snapshot. Calling it while a
    /// run is active would hand that run's current entry out twice.
    pub async fn recover_interrupted(&self) -> SyncResult<usize> {
        let mut recovered = 0;
        for op in self.load(Some(SyncStatus::Syncing)).await? {
            match self.apply(&op.id, Transition::Recover).await {
                Ok(Some(_)) => recovered += 1,
                Ok(None) | Err(SyncError::InvalidTransition { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        if recovered > 0 {
            warn!(recovered, "interrupted operations returned to pending");
        }
        Ok(recovered)
    }

    /// Counts entries by status.
    pub async fn get_stats(&self) -> SyncResult<QueueStats> {
        let mut stats = QueueStats::default();
        for op in self.get_all().await? {
            stats.total += 1;
            match op.status {
                SyncStatus::Pending => stats.pending += 1,
                SyncStatus::Syncing => stats.syncing += 1,
                SyncStatus::Synced => stats.synced += 1,
                SyncStatus::Error => stats.error += 1,
            }
        }
        Ok(stats)
    }

    /// Rewrites the target id of unsent operations on one record.
    ///
    /// Used once the server assigns a permanent id to a record created under
    /// a temporary one. Only `pending` and `error` entries are touched.
    pub async fn remap_record_id(
        &self,
        entity: EntityKind,
        old_id: &str,
        new_id: &str,
    ) -> SyncResult<usize> {
        let (old_id, new_id) = (old_id.to_string(), new_id.to_string());
        let log_ids = (old_id.clone(), new_id.clone());
        let remapped = self
            .inner
            .handle
            .run(move |db| {
                let documents = db.query_index(
                    SYNC_QUEUE,
                    "by_entity",
                    &IndexValue::from(entity.as_str()),
                )?;
                let mut remapped = 0;
                for document in documents {
                    let op = decode(&document)?;
                    let unsent = matches!(op.status, SyncStatus::Pending | SyncStatus::Error);
                    if !unsent || op.record_id().as_deref() != Some(old_id.as_str()) {
                        continue;
                    }
                    let updated = db.modify(SYNC_QUEUE, &op.id, |current| {
                        let mut next = current.clone();
                        if let Some(data) = next.get_mut("data").and_then(Value::as_object_mut) {
                            data.insert("id".into(), Value::String(new_id.clone()));
                        }
                        Ok(Some(next))
                    })?;
                    if updated.is_some() {
                        remapped += 1;
                    }
                }
                Ok(remapped)
            })
            .await?;

        if remapped > 0 {
            debug!(%entity, old_id = %log_ids.0, new_id = %log_ids.1, remapped, "queued operations remapped");
        }
        Ok(remapped)
    }

    /// Replays every pending entry once with `replay`.
    ///
    /// See [`process_queue_with`](Self::process_queue_with).
    pub async fn process_queue<F, Fut, E>(&self, replay: F) -> SyncResult<ProcessSummary>
    where
        F: FnMut(SyncOperation) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: fmt::Display,
    {
        self.process_queue_with(replay, |_, _| {}).await
    }

    /// Replays every pending entry once, calling `on_error` for each failure.
    ///
    /// Entries left in `syncing` by an interrupted run are first returned to
    /// `pending`. The pending entries are then snapshotted; anything enqueued
    /// later waits for the next run. Entries are replayed one at a time in
    /// replay order. Each is marked `syncing`, handed to `replay` in its
    /// freshly stored form, and then marked `synced` or failed.
    ///
    /// A failure never stops the run. Entries for a record that has an
    /// earlier entry parked in `error`, or that failed earlier in this run,
    /// are left pending and counted as deferred, so a record's operations
    /// are never replayed out of order. They move again once the blocking
    /// entry is retried and succeeds, or is removed.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyRunning` if another run is active on this queue, or a
    /// store error if the snapshot cannot be read. Per-entry failures are
    /// only counted.
    pub async fn process_queue_with<F, Fut, E, H>(
        &self,
        mut replay: F,
        mut on_error: H,
    ) -> SyncResult<ProcessSummary>
    where
        F: FnMut(SyncOperation) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: fmt::Display,
        H: FnMut(&SyncOperation, &E),
    {
        let _guard = RunGuard::acquire(&self.inner.running)?;
        self.recover_interrupted().await?;
        let snapshot = self.get_pending().await?;
        self.emit(SyncEvent::RunStarted {
            pending: snapshot.len(),
        });

        let mut summary = ProcessSummary::default();
        let mut blocked: HashSet<(EntityKind, String)> = self
            .get_failed()
            .await?
            .into_iter()
            .filter_map(|op| op.record_id().map(|id| (op.entity, id)))
            .collect();

        for queued in snapshot {
            let target = queued.record_id().map(|id| (queued.entity, id));
            if target.as_ref().is_some_and(|t| blocked.contains(t)) {
                debug!(id = %queued.id, "deferred behind a failed operation on the same record");
                summary.deferred += 1;
                continue;
            }

            let op = match self.mark_syncing(&queued.id).await {
                Ok(Some(op)) => op,
                // Removed or retried by someone else since the snapshot.
                Ok(None) | Err(SyncError::InvalidTransition { .. }) => continue,
                Err(e) => {
                    warn!(id = %queued.id, error = %e, "could not start replay");
                    summary.errors += 1;
                    blocked.extend(target);
                    continue;
                }
            };

            match replay(op.clone()).await {
                Ok(()) => match self.mark_synced(&op.id).await {
                    Ok(()) => summary.synced += 1,
                    Err(e) => {
                        warn!(id = %op.id, error = %e, "replayed but could not mark synced");
                        summary.errors += 1;
                        blocked.extend(target);
                    }
                },
                Err(error) => {
                    let message = error.to_string();
                    debug!(id = %op.id, error = %message, "replay failed");
                    if let Err(e) = self.mark_error(&op.id, message).await {
                        warn!(id = %op.id, error = %e, "could not record replay failure");
                    }
                    on_error(&op, &error);
                    summary.errors += 1;
                    blocked.extend(target);
                }
            }
        }

        info!(
            synced = summary.synced,
            errors = summary.errors,
            deferred = summary.deferred,
            "queue processed"
        );
        self.emit(SyncEvent::RunFinished {
            synced: summary.synced,
            errors: summary.errors,
        });
        Ok(summary)
    }

    async fn next_seq(&self) -> SyncResult<u64> {
        let counter = self
            .inner
            .next_seq
            .get_or_try_init(|| async {
                let highest = self
                    .inner
                    .handle
                    .run(|db| {
                        Ok(db
                            .get_all(SYNC_QUEUE)?
                            .iter()
                            .filter_map(|d| d.get("seq").and_then(Value::as_u64))
                            .max())
                    })
                    .await?;
                Ok::<_, SyncError>(AtomicU64::new(highest.map_or(0, |seq| seq + 1)))
            })
            .await?;
        Ok(counter.fetch_add(1, Ordering::SeqCst))
    }

    async fn load(&self, status: Option<SyncStatus>) -> SyncResult<Vec<SyncOperation>> {
        let documents = self
            .inner
            .handle
            .run(move |db| match status {
                Some(status) => db.query_index(
                    SYNC_QUEUE,
                    "by_status",
                    &IndexValue::from(status.as_str()),
                ),
                None => db.get_all(SYNC_QUEUE),
            })
            .await?;
        decode_sorted(&documents)
    }

    async fn apply(&self, id: &str, transition: Transition) -> SyncResult<Option<SyncOperation>> {
        let key = id.to_string();
        let event = transition.name();
        let outcome = self
            .inner
            .handle
            .run(move |db| {
                let mut applied = None;
                let mut rejected = None;
                db.modify(SYNC_QUEUE, &key, |document| {
                    let mut op = decode(document)?;
                    let from = op.status;
                    match op.transition(transition) {
                        Ok(changed) => {
                            let replacement = if changed { Some(encode(&op)?) } else { None };
                            applied = Some((from, op, changed));
                            Ok(replacement)
                        }
                        Err(e) => {
                            rejected = Some(e);
                            Ok(None)
                        }
                    }
                })?;
                Ok(match rejected {
                    Some(e) => Err(e),
                    None => Ok(applied),
                })
            })
            .await??;

        match outcome {
            None => {
                warn!(%id, event, "queue entry not found");
                Ok(None)
            }
            Some((from, op, changed)) => {
                if changed {
                    debug!(%id, %from, to = %op.status, retries = op.retries, "queue transition");
                    self.emit(SyncEvent::StatusChanged {
                        id: op.id.clone(),
                        from,
                        to: op.status,
                    });
                }
                Ok(Some(op))
            }
        }
    }
}

impl fmt::Debug for SyncQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncQueue")
            .field("config", &self.inner.config)
            .field("running", &self.inner.running.load(Ordering::Relaxed))
            .finish()
    }
}

/// Clears the running flag when a run ends, however it ends.
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> SyncResult<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| SyncError::AlreadyRunning)?;
        Ok(Self(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn decode(document: &Value) -> StoreResult<SyncOperation> {
    SyncOperation::from_document(document).map_err(|e| StoreError::decode(e.to_string()))
}

fn encode(op: &SyncOperation) -> StoreResult<Value> {
    op.to_document()
        .map_err(|e| StoreError::encode(e.to_string()))
}

fn decode_sorted(documents: &[Value]) -> SyncResult<Vec<SyncOperation>> {
    let mut ops = documents
        .iter()
        .map(SyncOperation::from_document)
        .collect::<SyncResult<Vec<_>>>()?;
    ops.sort_by_key(SyncOperation::order_key);
    Ok(ops)
}
