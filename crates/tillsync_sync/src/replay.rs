//! Turns queued operations into remote calls.

use crate::api::{ApiError, RemoteApi};
use crate::operation::{OperationType, SyncOperation};
use crate::retry::{fetch_with_retry, RetryOptions};
use serde_json::Value;
use std::sync::Arc;
use tillsync_store::primary_key;
use tracing::debug;

/// What the remote answered to a replayed operation.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayResponse {
    /// Record as stored remotely; `None` for deletes.
    pub record: Option<Value>,
    /// Id the remote stored the record under.
    pub server_id: Option<String>,
}

/// Replays one [`SyncOperation`] as one remote call, retried per the
/// configured policy.
pub struct ApiReplayer<A: RemoteApi> {
    api: Arc<A>,
    retry: RetryOptions<ApiError>,
}

impl<A: RemoteApi> ApiReplayer<A> {
    /// Creates a replayer.
    pub fn new(api: Arc<A>, retry: RetryOptions<ApiError>) -> Self {
        Self { api, retry }
    }

    /// Returns the remote.
    pub fn api(&self) -> &Arc<A> {
        &self.api
    }

    /// Sends `op` to the remote.
    ///
    /// # Errors
    ///
    /// Returns the last [`ApiError`] once retries are exhausted or the
    /// failure is not retryable. An operation without a record id is
    /// rejected up front with a do-not-retry error.
    pub async fn replay(&self, op: &SyncOperation) -> Result<ReplayResponse, ApiError> {
        let record_id = op.record_id().ok_or_else(|| {
            ApiError::other(format!("operation {} has no record id", op.id)).do_not_retry()
        })?;
        debug!(id = %op.id, op_type = %op.op_type, entity = %op.entity, %record_id, "replaying");

        match op.op_type {
            OperationType::Create => {
                let record =
                    fetch_with_retry(|| self.api.create(op.entity, &op.data), &self.retry).await?;
                let server_id = record.get("id").and_then(primary_key).or(Some(record_id));
                Ok(ReplayResponse {
                    record: Some(record),
                    server_id,
                })
            }
            OperationType::Update => {
                let record = fetch_with_retry(
                    || self.api.update(op.entity, &record_id, &op.data),
                    &self.retry,
                )
                .await?;
                Ok(ReplayResponse {
                    record: Some(record),
                    server_id: Some(record_id),
                })
            }
            OperationType::Delete => {
                fetch_with_retry(|| self.api.delete(op.entity, &record_id), &self.retry).await?;
                Ok(ReplayResponse {
                    record: None,
                    server_id: Some(record_id),
                })
            }
        }
    }
}

impl<A: RemoteApi> Clone for ApiReplayer<A> {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
            retry: self.retry.clone(),
        }
    }
}

impl<A: RemoteApi> std::fmt::Debug for ApiReplayer<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiReplayer")
            .field("retry", &self.retry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MemoryRemote;
    use crate::config::RetryConfig;
    use serde_json::json;
    use tillsync_store::EntityKind;

    fn replayer(remote: MemoryRemote) -> ApiReplayer<MemoryRemote> {
        ApiReplayer::new(Arc::new(remote), RetryOptions::new(RetryConfig::default()))
    }

    fn op(op_type: OperationType, data: Value) -> SyncOperation {
        SyncOperation::new(op_type, EntityKind::Product, data, 1, 3)
    }

    #[tokio::test]
    async fn maps_operation_types_to_calls() {
        let replayer = replayer(MemoryRemote::new());
        let data = json!({"id": "p1", "sku": "A"});

        let created = replayer
            .replay(&op(OperationType::Create, data.clone()))
            .await
            .unwrap();
        assert_eq!(created.server_id.as_deref(), Some("p1"));

        replayer
            .replay(&op(OperationType::Update, json!({"id": "p1", "sku": "B"})))
            .await
            .unwrap();
        replayer
            .replay(&op(OperationType::Delete, json!({"id": "p1"})))
            .await
            .unwrap();

        let methods: Vec<&str> = replayer.api().calls().iter().map(|c| c.method).collect();
        assert_eq!(methods, vec!["create", "update", "delete"]);
        assert_eq!(replayer.api().count(EntityKind::Product), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let remote = MemoryRemote::new();
        remote.fail_next(2, ApiError::http(503, "busy"));
        let replayer = replayer(remote);

        replayer
            .replay(&op(OperationType::Create, json!({"id": "p1"})))
            .await
            .unwrap();
        assert_eq!(replayer.api().calls().len(), 3);
    }

    #[tokio::test]
    async fn server_assigned_id_is_reported() {
        let replayer = replayer(MemoryRemote::assigning_ids());
        let response = replayer
            .replay(&op(OperationType::Create, json!({"id": "tmp-7"})))
            .await
            .unwrap();
        assert_eq!(response.server_id.as_deref(), Some("srv-1"));
    }

    #[tokio::test]
    async fn missing_record_id_is_fatal() {
        let replayer = replayer(MemoryRemote::new());
        let err = replayer
            .replay(&op(OperationType::Delete, json!({})))
            .await
            .unwrap_err();
        assert!(err.no_retry);
        assert!(replayer.api().calls().is_empty());
    }
}
