//! # Cross-context data sync coordinator for the ledger app.
//!
//! Propagates "a transaction changed" signals between independent execution
//! contexts ("tabs") of the same user, using a shared key-value store as the
//! only transport. One [`SyncCoordinator`] runs per context and:
//!
//! 1. Accepts transaction-change intents from local code (`notify_*`)
//! 2. Debounces and coalesces them by event type (last write wins)
//! 3. Acquires an optimistic timeout-based lock before writing
//! 4. Writes a versioned [`SyncEvent`] visible to every other context
//! 5. Fans events out to local subscribers, both for its own writes and for
//!    writes it observes from other contexts
//! 6. Retries failed writes with exponential backoff up to a bound
//! 7. Reports lock contention as a conflict instead of silently overwriting
//!
//! ```text
//! ┌──────────────┐ notify_*  ┌──────────────────┐  write   ┌─────────────┐
//! │  UI / CRUD   │──────────▶│ SyncCoordinator  │─────────▶│ SharedStore │
//! │   services   │           │ (debounce, lock, │          │ (one per    │
//! └──────────────┘           │  retry, version) │◀─────────│   origin)   │
//!                            └────────┬─────────┘  change  └─────────────┘
//!                                     │ states/toasts
//!                            ┌────────▼─────────┐
//!                            │ SyncStateManager │
//!                            └──────────────────┘
//! ```
//!
//! `notify_*` calls are fire-and-forget: failures never surface as errors in
//! the calling code path, only through the
//! [`SyncStateManager`](ledger_sync_state::SyncStateManager) state and
//! notification channels.
//!
//! The lock is best-effort, not a true mutual-exclusion primitive: two
//! contexts can race between the staleness read and the lock write. That is
//! accepted because payloads are idempotent "something changed, refetch"
//! signals, and the staleness timeout guarantees a crashed context cannot
//! deadlock the rest.

mod coordinator;
mod dirty;
mod error;
mod event;
mod retry;

pub use coordinator::{CoordinatorConfig, SyncCoordinator};
pub use dirty::{consume_transactions_dirty, mark_transactions_dirty, peek_transactions_dirty};
pub use error::{SyncError, SyncResult};
pub use event::{LockRecord, SyncEvent, SyncEventType};

// Re-exported so consumers need only this crate for the common surface.
pub use ledger_sync_state::{ListenerId, OperationId};
