//! Shared key-value store abstraction for cross-context ledger sync.
//!
//! Every open window of the ledger app is an independent execution context;
//! the only thing they share is a same-origin persistent store. This crate
//! defines that boundary:
//!
//! - [`SharedStore`]: the read/write/remove contract plus a change-notification
//!   channel delivering [`StoreChange`] records to subscribed contexts
//! - [`MemoryStore`]: an in-process backend with a byte quota, used by tests
//!   and by any host that brokers contexts inside one process
//! - [`StoreKeys`]: the well-known keys the sync layer writes under
//!
//! Change notifications carry the writer's [`ContextId`] so that consumers
//! can drop echoes of their own writes, matching the semantics of a browser
//! `storage` event (the writing tab never hears itself).

mod keys;
mod memory;
mod testing;
mod traits;

pub use keys::StoreKeys;
pub use memory::MemoryStore;
pub use testing::RecordingStore;
pub use traits::{ContextId, SharedStore, StoreChange};

use thiserror::Error;

/// Error type for shared store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store cannot accept the write without exceeding its byte budget.
    #[error("Store quota exceeded: {needed} bytes needed, {available} available")]
    QuotaExceeded {
        /// Bytes the rejected write would have occupied.
        needed: usize,
        /// Bytes left under the budget.
        available: usize,
    },

    /// Backend-specific write failure
    #[error("Store backend error: {0}")]
    Backend(String),

    /// JSON encoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias using StoreError.
pub type StoreResult<T> = Result<T, StoreError>;
