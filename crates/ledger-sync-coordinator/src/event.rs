//! Sync event and lock record wire types.

use chrono::Utc;
use ledger_sync_state::OperationId;
use serde::{Deserialize, Serialize};

/// The kind of transaction mutation being broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncEventType {
    /// A transaction was created.
    TransactionAdded,
    /// A transaction was deleted.
    TransactionDeleted,
    /// A transaction was modified.
    TransactionUpdated,
}

/// The unit of cross-context communication.
///
/// Created when local code calls a `notify_*` method, coalesced in the
/// debounce queue, then serialized into the shared store just long enough
/// for other contexts to observe it. The payload is opaque to the
/// coordinator; consumers refetch rather than apply it as a mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEvent {
    /// Mutation kind.
    #[serde(rename = "type")]
    pub event_type: SyncEventType,
    /// Wall-clock milliseconds at emission.
    pub timestamp_ms: i64,
    /// Opaque payload describing the mutated transaction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Correlates this emission with its lock/retry/state lifecycle.
    pub operation_id: OperationId,
    /// Whether the caller has already persisted the underlying mutation.
    pub confirmed: bool,
    /// Prior retry attempts for this logical operation.
    pub retry_count: u32,
    /// The emitter's data-version counter at emission. Advisory only:
    /// concurrent writers can stamp the same version.
    pub version: u64,
}

impl SyncEvent {
    /// Build a fresh event with a generated operation id and the current
    /// wall-clock timestamp.
    pub fn new(
        event_type: SyncEventType,
        data: Option<serde_json::Value>,
        confirmed: bool,
        version: u64,
    ) -> Self {
        Self {
            event_type,
            timestamp_ms: Utc::now().timestamp_millis(),
            data,
            operation_id: OperationId::generate(),
            confirmed,
            retry_count: 0,
            version,
        }
    }
}

/// Lock record written at [`StoreKeys::SYNC_LOCK`](ledger_sync_store::StoreKeys::SYNC_LOCK).
///
/// Treated as expired once older than the configured lock timeout, so a
/// crashed context can never hold the lock forever.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRecord {
    /// The operation that acquired the lock.
    pub operation_id: OperationId,
    /// Wall-clock milliseconds at acquisition.
    pub timestamp_ms: i64,
}

impl LockRecord {
    /// A lock record for `operation_id` stamped now.
    pub fn acquire(operation_id: &OperationId) -> Self {
        Self {
            operation_id: operation_id.clone(),
            timestamp_ms: Utc::now().timestamp_millis(),
        }
    }

    /// Whether this record is older than `timeout_ms` and therefore
    /// stealable.
    pub fn is_stale(&self, timeout_ms: i64) -> bool {
        Utc::now().timestamp_millis() - self.timestamp_ms >= timeout_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_uses_snake_case_tags() {
        assert_eq!(
            serde_json::to_string(&SyncEventType::TransactionAdded).unwrap(),
            "\"transaction_added\""
        );
        assert_eq!(
            serde_json::to_string(&SyncEventType::TransactionUpdated).unwrap(),
            "\"transaction_updated\""
        );
        assert_eq!(
            serde_json::to_string(&SyncEventType::TransactionDeleted).unwrap(),
            "\"transaction_deleted\""
        );
    }

    #[test]
    fn event_roundtrips_through_json() {
        let event = SyncEvent::new(
            SyncEventType::TransactionAdded,
            Some(serde_json::json!({"id": "t1", "amount": 42})),
            true,
            7,
        );

        let raw = serde_json::to_string(&event).unwrap();
        let back: SyncEvent = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn event_wire_format_is_camel_case() {
        let event = SyncEvent::new(SyncEventType::TransactionDeleted, None, false, 1);
        let raw = serde_json::to_string(&event).unwrap();
        assert!(raw.contains("\"type\":\"transaction_deleted\""));
        assert!(raw.contains("\"operationId\""));
        assert!(raw.contains("\"retryCount\""));
        // Absent payloads are omitted entirely.
        assert!(!raw.contains("\"data\""));
    }

    #[test]
    fn lock_staleness_respects_timeout() {
        let mut lock = LockRecord::acquire(&OperationId::generate());
        assert!(!lock.is_stale(5_000));

        lock.timestamp_ms = Utc::now().timestamp_millis() - 10_000;
        assert!(lock.is_stale(5_000));
    }
}
