//! Dirty flag for cached transaction data.
//!
//! A longer-lived signal than the transient sync event: data-fetching code
//! checks it to decide whether cached reads must be bypassed. The CRUD
//! services stamp it after every successful mutation; the coordinator also
//! stamps it as part of each successful emit.

use chrono::Utc;
use ledger_sync_store::{ContextId, SharedStore, StoreKeys};
use tracing::warn;

/// Stamp the transactions-dirty flag with the current wall-clock time.
///
/// Best-effort: a failed stamp is logged, never surfaced, since the flag is
/// advisory.
pub fn mark_transactions_dirty(store: &dyn SharedStore, ctx: &ContextId) {
    let stamp = Utc::now().timestamp_millis().to_string();
    if let Err(err) = store.write_string(ctx, StoreKeys::TRANSACTIONS_DIRTY, &stamp) {
        warn!(error = %err, "failed to mark transactions dirty");
    }
}

/// Whether the dirty flag is set, without clearing it.
pub fn peek_transactions_dirty(store: &dyn SharedStore) -> bool {
    store.read_string(StoreKeys::TRANSACTIONS_DIRTY).is_some()
}

/// Consume the dirty flag: returns `true` exactly once per stamp and
/// clears it.
pub fn consume_transactions_dirty(store: &dyn SharedStore, ctx: &ContextId) -> bool {
    if store.read_string(StoreKeys::TRANSACTIONS_DIRTY).is_some() {
        store.remove(ctx, StoreKeys::TRANSACTIONS_DIRTY);
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_sync_store::MemoryStore;

    #[test]
    fn mark_then_peek_round_trip() {
        let store = MemoryStore::new();
        let ctx = ContextId::generate();

        assert!(!peek_transactions_dirty(&store));
        mark_transactions_dirty(&store, &ctx);
        assert!(peek_transactions_dirty(&store));
        // Peek does not consume.
        assert!(peek_transactions_dirty(&store));
    }

    #[test]
    fn consume_returns_true_exactly_once() {
        let store = MemoryStore::new();
        let ctx = ContextId::generate();

        mark_transactions_dirty(&store, &ctx);
        assert!(consume_transactions_dirty(&store, &ctx));
        assert!(!consume_transactions_dirty(&store, &ctx));
        assert!(!peek_transactions_dirty(&store));
    }

    #[test]
    fn mark_failure_is_swallowed() {
        // Zero capacity: every write fails, but marking must not panic.
        let store = MemoryStore::with_capacity(0);
        let ctx = ContextId::generate();

        mark_transactions_dirty(&store, &ctx);
        assert!(!peek_transactions_dirty(&store));
    }
}
