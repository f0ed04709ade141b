//! Queued operations and their status machine.

use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tillsync_store::{primary_key, EntityKind};
use uuid::Uuid;

/// Kind of mutation to replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationType {
    /// A record created on this till.
    Create,
    /// A record modified on this till.
    Update,
    /// A record removed on this till.
    Delete,
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        })
    }
}

/// Delivery status of a queued operation.
///
/// ```text
/// pending --begin--> syncing --succeed--> synced
///                    syncing --fail-----> pending   (retries left)
///                    syncing --fail-----> error     (retries exhausted)
/// error --retry--> pending
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Waiting for the next replay.
    Pending,
    /// Being replayed right now.
    Syncing,
    /// Accepted by the remote.
    Synced,
    /// Out of retries; waits for a manual retry or removal.
    Error,
}

impl SyncStatus {
    /// Lowercase name, as stored.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event that moves an operation between statuses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Replay is starting.
    BeginSync,
    /// The remote accepted the operation.
    Succeed,
    /// Replay failed with this message.
    Fail(String),
    /// Manual reset of a failed operation.
    Retry,
    /// Return of an operation whose replay was interrupted before its
    /// outcome was recorded. Retries are left as they were.
    Recover,
}

impl Transition {
    /// Short name used in errors and logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::BeginSync => "begin sync",
            Self::Succeed => "mark synced",
            Self::Fail(_) => "mark error",
            Self::Retry => "retry",
            Self::Recover => "recover",
        }
    }
}

/// One mutation waiting to be replayed against the remote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOperation {
    /// Unique id: `<enqueue ms>-<uuid>`. Never used for ordering.
    pub id: String,
    /// Kind of mutation.
    #[serde(rename = "type")]
    pub op_type: OperationType,
    /// Kind of record.
    pub entity: EntityKind,
    /// Payload: the full record, or just `{id}` for deletes.
    pub data: Value,
    /// Enqueue time in ms; the ordering key.
    pub timestamp: i64,
    /// Delivery status.
    pub status: SyncStatus,
    /// Failed attempts so far.
    pub retries: u32,
    /// Failed attempts after which the status becomes `error`.
    pub max_retries: u32,
    /// Message of the last failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Client-generated id a CREATE was issued under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_id: Option<String>,
    /// Enqueue sequence; breaks timestamp ties.
    #[serde(default)]
    pub seq: u64,
}

impl SyncOperation {
    /// Creates a pending operation.
    pub fn new(
        op_type: OperationType,
        entity: EntityKind,
        data: Value,
        timestamp: i64,
        max_retries: u32,
    ) -> Self {
        Self {
            id: format!("{timestamp}-{}", Uuid::new_v4().simple()),
            op_type,
            entity,
            data,
            timestamp,
            status: SyncStatus::Pending,
            retries: 0,
            max_retries,
            error: None,
            local_id: None,
            seq: 0,
        }
    }

    /// Sets the client-generated id.
    #[must_use]
    pub fn with_local_id(mut self, local_id: Option<String>) -> Self {
        self.local_id = local_id;
        self
    }

    /// Id of the record the operation targets.
    pub fn record_id(&self) -> Option<String> {
        self.data.get("id").and_then(primary_key)
    }

    /// Ordering key for replay.
    pub fn order_key(&self) -> (i64, u64) {
        (self.timestamp, self.seq)
    }

    /// Applies `transition`, returning whether anything changed.
    ///
    /// Marking an already synced operation synced again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` if the event is not allowed from the
    /// current status; the operation is left untouched.
    pub fn transition(&mut self, transition: Transition) -> SyncResult<bool> {
        let next = match (self.status, &transition) {
            (SyncStatus::Pending, Transition::BeginSync) => SyncStatus::Syncing,
            (SyncStatus::Syncing, Transition::Succeed) => SyncStatus::Synced,
            (SyncStatus::Synced, Transition::Succeed) => return Ok(false),
            (SyncStatus::Syncing, Transition::Fail(_)) => {
                if self.retries.saturating_add(1) >= self.max_retries {
                    SyncStatus::Error
                } else {
                    SyncStatus::Pending
                }
            }
            (SyncStatus::Error, Transition::Retry) => SyncStatus::Pending,
            (SyncStatus::Syncing, Transition::Recover) => SyncStatus::Pending,
            (from, rejected) => {
                return Err(SyncError::InvalidTransition {
                    id: self.id.clone(),
                    from,
                    event: rejected.name(),
                })
            }
        };

        match transition {
            Transition::Fail(message) => {
                self.retries = self.retries.saturating_add(1);
                self.error = Some(message);
            }
            Transition::Retry => {
                self.retries = 0;
                self.error = None;
            }
            Transition::BeginSync | Transition::Succeed | Transition::Recover => {}
        }
        self.status = next;
        Ok(true)
    }

    /// Stored form.
    pub(crate) fn to_document(&self) -> SyncResult<Value> {
        serde_json::to_value(self).map_err(|e| SyncError::codec(e.to_string()))
    }

    /// Parses the stored form.
    pub(crate) fn from_document(document: &Value) -> SyncResult<Self> {
        Self::deserialize(document).map_err(|e| SyncError::codec(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn op(max_retries: u32) -> SyncOperation {
        SyncOperation::new(
            OperationType::Create,
            EntityKind::Sale,
            json!({"id": "s1", "total_cents": 500}),
            1_700_000_000_000,
            max_retries,
        )
    }

    #[test]
    fn id_embeds_timestamp() {
        let op = op(3);
        assert!(op.id.starts_with("1700000000000-"));
        assert_eq!(op.record_id().as_deref(), Some("s1"));
    }

    #[test]
    fn serializes_with_wire_names() {
        let op = op(3).with_local_id(Some("tmp-1".into()));
        let value = op.to_document().unwrap();
        assert_eq!(value["type"], "CREATE");
        assert_eq!(value["entity"], "sale");
        assert_eq!(value["status"], "pending");
        assert_eq!(value["maxRetries"], 3);
        assert_eq!(value["localId"], "tmp-1");
        assert!(value.get("error").is_none());
        assert_eq!(SyncOperation::from_document(&value).unwrap(), op);
    }

    #[test]
    fn happy_path() {
        let mut op = op(3);
        assert!(op.transition(Transition::BeginSync).unwrap());
        assert!(op.transition(Transition::Succeed).unwrap());
        assert_eq!(op.status, SyncStatus::Synced);
        assert!(!op.transition(Transition::Succeed).unwrap());
    }

    #[test]
    fn failures_exhaust_at_ceiling() {
        let mut op = op(3);
        for expected in [SyncStatus::Pending, SyncStatus::Pending, SyncStatus::Error] {
            op.transition(Transition::BeginSync).unwrap();
            op.transition(Transition::Fail("HTTP 503".into())).unwrap();
            assert_eq!(op.status, expected);
        }
        assert_eq!(op.retries, 3);
        assert_eq!(op.error.as_deref(), Some("HTTP 503"));

        op.transition(Transition::Retry).unwrap();
        assert_eq!(op.status, SyncStatus::Pending);
        assert_eq!(op.retries, 0);
        assert!(op.error.is_none());
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        let mut op = op(3);
        assert!(matches!(
            op.transition(Transition::Succeed),
            Err(SyncError::InvalidTransition {
                from: SyncStatus::Pending,
                ..
            })
        ));
        assert!(op.transition(Transition::Retry).is_err());
        assert!(op.transition(Transition::Fail("x".into())).is_err());
        assert_eq!(op.status, SyncStatus::Pending);
        assert_eq!(op.retries, 0);

        op.transition(Transition::BeginSync).unwrap();
        op.transition(Transition::Succeed).unwrap();
        assert!(op.transition(Transition::BeginSync).is_err());
    }

    #[test]
    fn interrupted_replay_recovers_to_pending() {
        let mut op = op(3);
        assert!(op.transition(Transition::Recover).is_err());

        op.transition(Transition::BeginSync).unwrap();
        op.transition(Transition::Fail("timed out".into())).unwrap();
        op.transition(Transition::BeginSync).unwrap();
        assert!(op.transition(Transition::Recover).unwrap());
        assert_eq!(op.status, SyncStatus::Pending);
        assert_eq!(op.retries, 1);
        assert_eq!(op.error.as_deref(), Some("timed out"));
    }

    #[test]
    fn zero_ceiling_fails_immediately() {
        let mut op = op(0);
        op.transition(Transition::BeginSync).unwrap();
        op.transition(Transition::Fail("x".into())).unwrap();
        assert_eq!(op.status, SyncStatus::Error);
    }
}
