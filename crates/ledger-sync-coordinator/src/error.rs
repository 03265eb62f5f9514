//! Coordinator error types.

use ledger_sync_state::OperationId;
use ledger_sync_store::StoreError;
use thiserror::Error;

/// Error type for sync coordination.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Shared store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The store reported no write capacity before the attempt
    #[error("Store quota exhausted")]
    QuotaExhausted,

    /// Another context holds a live lock
    #[error("Sync lock held by operation {holder}")]
    LockHeld {
        /// Operation id recorded in the foreign lock.
        holder: OperationId,
    },

    /// An incoming cross-context payload was not a valid event
    #[error("Malformed sync event payload: {0}")]
    Parse(#[source] serde_json::Error),

    /// All retry attempts consumed
    #[error("Sync failed after {attempts} attempts for operation {operation_id}: {cause}")]
    RetriesExhausted {
        /// The abandoned operation.
        operation_id: OperationId,
        /// Total attempts made, initial plus retries.
        attempts: u32,
        /// The final triggering error.
        cause: String,
    },
}

/// Result type alias using SyncError.
pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_held_display_names_holder() {
        let err = SyncError::LockHeld {
            holder: OperationId::from_string("op-9"),
        };
        assert_eq!(format!("{}", err), "Sync lock held by operation op-9");
    }

    #[test]
    fn retries_exhausted_display() {
        let err = SyncError::RetriesExhausted {
            operation_id: OperationId::from_string("op-1"),
            attempts: 4,
            cause: "write refused".to_string(),
        };
        let text = format!("{}", err);
        assert!(text.contains("4 attempts"));
        assert!(text.contains("op-1"));
        assert!(text.contains("write refused"));
    }

    #[test]
    fn store_error_converts() {
        let err: SyncError = StoreError::Backend("down".to_string()).into();
        assert!(format!("{}", err).contains("down"));
    }
}
