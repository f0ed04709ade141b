//! Remote API abstraction.
//!
//! The backend is reached through [`RemoteApi`], so any HTTP client (or a
//! non-HTTP transport) can be plugged in. [`MemoryRemote`] is an in-process
//! implementation for tests and demos.

use crate::retry::FailureSignal;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tillsync_store::{primary_key, EntityKind};

/// What went wrong with a remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// The request never got a response (DNS, refused, reset).
    Transport,
    /// The client gave up waiting.
    Timeout,
    /// The client aborted the request.
    Cancelled,
    /// The server answered with an error status.
    Http,
    /// Anything else.
    Other,
}

/// A failed remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    /// Failure category.
    pub kind: ApiErrorKind,
    /// Human-readable message.
    pub message: String,
    /// HTTP status, when the server responded.
    pub status: Option<u16>,
    /// Set by callers that know retrying is pointless.
    pub no_retry: bool,
}

impl ApiError {
    fn new(kind: ApiErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            no_retry: false,
        }
    }

    /// Creates a transport failure.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Transport, message)
    }

    /// Creates a client-side timeout.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Timeout, message)
    }

    /// Creates a client-side cancellation.
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Cancelled, message)
    }

    /// Creates an error response.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            ..Self::new(ApiErrorKind::Http, message)
        }
    }

    /// Creates an uncategorized error.
    pub fn other(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Other, message)
    }

    /// Flags the error as not worth retrying.
    #[must_use]
    pub fn do_not_retry(mut self) -> Self {
        self.no_retry = true;
        self
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.kind, self.status) {
            (_, Some(status)) => write!(f, "HTTP {status}: {}", self.message),
            (ApiErrorKind::Transport, None) => write!(f, "transport error: {}", self.message),
            (ApiErrorKind::Timeout, None) => write!(f, "timed out: {}", self.message),
            (ApiErrorKind::Cancelled, None) => write!(f, "cancelled: {}", self.message),
            _ => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for ApiError {}

impl FailureSignal for ApiError {
    fn no_retry(&self) -> bool {
        self.no_retry
    }

    fn is_transport(&self) -> bool {
        self.kind == ApiErrorKind::Transport
    }

    fn is_timeout(&self) -> bool {
        matches!(self.kind, ApiErrorKind::Timeout | ApiErrorKind::Cancelled)
    }

    fn status(&self) -> Option<u16> {
        self.status
    }
}

/// The remote backend, one call per mutation.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Creates a record and returns it as stored by the server, which may
    /// assign a different id.
    async fn create(&self, entity: EntityKind, data: &Value) -> Result<Value, ApiError>;

    /// Replaces a record.
    async fn update(&self, entity: EntityKind, id: &str, data: &Value) -> Result<Value, ApiError>;

    /// Deletes a record.
    async fn delete(&self, entity: EntityKind, id: &str) -> Result<(), ApiError>;
}

/// One call received by a [`MemoryRemote`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCall {
    /// `create`, `update`, or `delete`.
    pub method: &'static str,
    /// Entity kind.
    pub entity: EntityKind,
    /// Record id as sent by the client.
    pub id: String,
}

/// An in-memory backend for testing.
///
/// Failures can be scripted with [`fail_next`](Self::fail_next); each
/// scripted error is returned by exactly one call, in order.
#[derive(Debug, Default)]
pub struct MemoryRemote {
    records: Mutex<HashMap<(EntityKind, String), Value>>,
    failures: Mutex<VecDeque<ApiError>>,
    calls: Mutex<Vec<RemoteCall>>,
    assign_ids: bool,
    next_id: AtomicU64,
}

impl MemoryRemote {
    /// Creates an empty remote that keeps client ids.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty remote that assigns `srv-N` ids on create.
    pub fn assigning_ids() -> Self {
        Self {
            assign_ids: true,
            ..Self::default()
        }
    }

    /// Makes the next `times` calls fail with `error`.
    pub fn fail_next(&self, times: usize, error: ApiError) {
        let mut failures = self.failures.lock();
        failures.extend(std::iter::repeat(error).take(times));
    }

    /// Returns a stored record.
    pub fn record(&self, entity: EntityKind, id: &str) -> Option<Value> {
        self.records.lock().get(&(entity, id.to_string())).cloned()
    }

    /// Number of stored records of a kind.
    pub fn count(&self, entity: EntityKind) -> usize {
        self.records
            .lock()
            .keys()
            .filter(|(kind, _)| *kind == entity)
            .count()
    }

    /// Every call received so far, failed ones included.
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().clone()
    }

    fn begin(&self, method: &'static str, entity: EntityKind, id: &str) -> Result<(), ApiError> {
        self.calls.lock().push(RemoteCall {
            method,
            entity,
            id: id.to_string(),
        });
        match self.failures.lock().pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteApi for MemoryRemote {
    async fn create(&self, entity: EntityKind, data: &Value) -> Result<Value, ApiError> {
        let client_id = data
            .get("id")
            .and_then(primary_key)
            .ok_or_else(|| ApiError::http(400, "record has no id"))?;
        self.begin("create", entity, &client_id)?;

        let id = if self.assign_ids {
            format!("srv-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
        } else {
            client_id
        };
        let mut stored = data.clone();
        if let Value::Object(fields) = &mut stored {
            fields.insert("id".into(), Value::String(id.clone()));
        }
        self.records.lock().insert((entity, id), stored.clone());
        Ok(stored)
    }

    async fn update(&self, entity: EntityKind, id: &str, data: &Value) -> Result<Value, ApiError> {
        self.begin("update", entity, id)?;
        let mut records = self.records.lock();
        match records.get_mut(&(entity, id.to_string())) {
            Some(stored) => {
                *stored = data.clone();
                Ok(data.clone())
            }
            None => Err(ApiError::http(404, format!("{entity} {id} not found"))),
        }
    }

    async fn delete(&self, entity: EntityKind, id: &str) -> Result<(), ApiError> {
        self.begin("delete", entity, id)?;
        self.records.lock().remove(&(entity, id.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn memory_remote_round_trip() {
        let remote = MemoryRemote::new();
        let created = remote
            .create(EntityKind::Product, &json!({"id": "p1", "sku": "A"}))
            .await
            .unwrap();
        assert_eq!(created["id"], "p1");

        remote
            .update(EntityKind::Product, "p1", &json!({"id": "p1", "sku": "B"}))
            .await
            .unwrap();
        assert_eq!(remote.record(EntityKind::Product, "p1").unwrap()["sku"], "B");

        remote.delete(EntityKind::Product, "p1").await.unwrap();
        assert_eq!(remote.count(EntityKind::Product), 0);
        assert_eq!(remote.calls().len(), 3);
    }

    #[tokio::test]
    async fn assigning_remote_replaces_ids() {
        let remote = MemoryRemote::assigning_ids();
        let created = remote
            .create(EntityKind::Customer, &json!({"id": "tmp-1"}))
            .await
            .unwrap();
        assert_eq!(created["id"], "srv-1");
        assert!(remote.record(EntityKind::Customer, "srv-1").is_some());
    }

    #[tokio::test]
    async fn scripted_failures_are_consumed_in_order() {
        let remote = MemoryRemote::new();
        remote.fail_next(1, ApiError::timeout("slow"));
        remote.fail_next(1, ApiError::http(500, "boom"));

        let data = json!({"id": "s1"});
        let first = remote.create(EntityKind::Sale, &data).await.unwrap_err();
        assert_eq!(first.kind, ApiErrorKind::Timeout);
        let second = remote.create(EntityKind::Sale, &data).await.unwrap_err();
        assert_eq!(second.status, Some(500));
        assert!(remote.create(EntityKind::Sale, &data).await.is_ok());
    }

    #[tokio::test]
    async fn update_of_unknown_record_is_404() {
        let remote = MemoryRemote::new();
        let err = remote
            .update(EntityKind::Sale, "s9", &json!({"id": "s9"}))
            .await
            .unwrap_err();
        assert_eq!(err.status, Some(404));
    }

    #[test]
    fn display_includes_status() {
        assert_eq!(ApiError::http(429, "slow down").to_string(), "HTTP 429: slow down");
        assert_eq!(
            ApiError::transport("refused").to_string(),
            "transport error: refused"
        );
        assert!(ApiError::other("x").do_not_retry().no_retry);
    }
}
