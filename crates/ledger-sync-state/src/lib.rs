//! Observable sync lifecycle state for the ledger app.
//!
//! [`SyncStateManager`] is pure bookkeeping and fan-out: it tracks the
//! lifecycle of in-flight synchronization operations
//! (`idle → syncing → success | error | conflict`), keeps a bounded history
//! plus per-operation snapshots, and pushes one-shot user-facing
//! notifications to toast UI. It never performs I/O and never retries
//! anything; that is the coordinator's job.
//!
//! Listeners are invoked synchronously on every transition. A panicking
//! listener is isolated and logged so the remaining listeners still run.

mod manager;
mod notification;
mod operation;
mod state;

pub use manager::{ListenerId, StateManagerConfig, SyncStateManager};
pub use notification::{Notification, NotificationAction, NotificationKind};
pub use operation::OperationId;
pub use state::{StateUpdate, SyncState, SyncStatus};
