//! Sync state data model.

use crate::OperationId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a synchronization operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Nothing in flight.
    Idle,
    /// An operation is writing or retrying.
    Syncing,
    /// The most recent operation completed.
    Success,
    /// The most recent operation failed terminally.
    Error,
    /// Another context holds the lock; the caller decides whether to retry.
    Conflict,
}

/// The externally observable sync state.
///
/// Exactly one state is "current" at any instant; per-operation snapshots
/// and a bounded history preserve outcomes of superseded operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    /// Current lifecycle status.
    pub status: SyncStatus,
    /// Human-readable description of what is happening.
    pub message: Option<String>,
    /// Progress percentage, 0-100.
    pub progress: Option<u8>,
    /// Error text when `status` is `Error`.
    pub error: Option<String>,
    /// When this state was recorded.
    pub timestamp: DateTime<Utc>,
    /// The operation this state belongs to, if any.
    pub operation_id: Option<OperationId>,
}

impl SyncState {
    /// The initial idle state.
    pub fn idle() -> Self {
        Self {
            status: SyncStatus::Idle,
            message: None,
            progress: None,
            error: None,
            timestamp: Utc::now(),
            operation_id: None,
        }
    }
}

/// A partial state transition, merged into the current state.
///
/// `Some` fields overwrite; `None` fields leave the current value in place.
/// The `clear_*` flags reset fields that a transition must not inherit
/// (a success must not carry a stale error message forward).
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    /// New status, if changing.
    pub status: Option<SyncStatus>,
    /// New message, if changing.
    pub message: Option<String>,
    /// New progress percentage, clamped to 100.
    pub progress: Option<u8>,
    /// New error text, if changing.
    pub error: Option<String>,
    /// Reset `error` before applying the rest.
    pub clear_error: bool,
    /// Reset `progress` before applying the rest.
    pub clear_progress: bool,
}

impl StateUpdate {
    /// Apply this update onto `state`, leaving the timestamp untouched
    /// (the manager stamps it).
    pub(crate) fn apply(self, state: &mut SyncState) {
        if self.clear_error {
            state.error = None;
        }
        if self.clear_progress {
            state.progress = None;
        }
        if let Some(status) = self.status {
            state.status = status;
        }
        if let Some(message) = self.message {
            state.message = Some(message);
        }
        if let Some(progress) = self.progress {
            state.progress = Some(progress.min(100));
        }
        if let Some(error) = self.error {
            state.error = Some(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_state_has_no_details() {
        let state = SyncState::idle();
        assert_eq!(state.status, SyncStatus::Idle);
        assert!(state.message.is_none());
        assert!(state.error.is_none());
        assert!(state.operation_id.is_none());
    }

    #[test]
    fn update_overwrites_only_provided_fields() {
        let mut state = SyncState::idle();
        state.message = Some("before".to_string());

        StateUpdate {
            status: Some(SyncStatus::Syncing),
            ..StateUpdate::default()
        }
        .apply(&mut state);

        assert_eq!(state.status, SyncStatus::Syncing);
        assert_eq!(state.message.as_deref(), Some("before"));
    }

    #[test]
    fn clear_flags_reset_before_apply() {
        let mut state = SyncState::idle();
        state.error = Some("boom".to_string());
        state.progress = Some(40);

        StateUpdate {
            status: Some(SyncStatus::Success),
            clear_error: true,
            clear_progress: true,
            ..StateUpdate::default()
        }
        .apply(&mut state);

        assert!(state.error.is_none());
        assert!(state.progress.is_none());
    }

    #[test]
    fn progress_is_clamped() {
        let mut state = SyncState::idle();
        StateUpdate {
            progress: Some(250),
            ..StateUpdate::default()
        }
        .apply(&mut state);
        assert_eq!(state.progress, Some(100));
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&SyncStatus::Syncing).unwrap(),
            "\"syncing\""
        );
        assert_eq!(
            serde_json::to_string(&SyncStatus::Conflict).unwrap(),
            "\"conflict\""
        );
    }
}
