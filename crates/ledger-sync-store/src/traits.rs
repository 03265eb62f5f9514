//! Store trait definitions.

use crate::StoreResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

/// Identifies one execution context ("tab") sharing the store.
///
/// Writes are stamped with the writer's context id so subscribers can
/// discard notifications for their own writes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(String);

impl ContextId {
    /// Generate a fresh random context id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Build a context id from an existing string.
    pub fn from_string(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single observed mutation of the shared store.
#[derive(Debug, Clone)]
pub struct StoreChange {
    /// The key that changed.
    pub key: String,
    /// The value after the change, `None` for removals.
    pub new_value: Option<String>,
    /// The context that performed the write.
    pub writer: ContextId,
}

/// Contract for a same-origin store shared by independent execution contexts.
///
/// All methods take `&self`; implementations are expected to use interior
/// mutability and be safe to share behind an `Arc`.
pub trait SharedStore: Send + Sync {
    /// Read the string value at `key`, if present.
    fn read_string(&self, key: &str) -> Option<String>;

    /// Write a string value, attributed to `writer`.
    fn write_string(&self, writer: &ContextId, key: &str, value: &str) -> StoreResult<()>;

    /// Remove the value at `key`, attributed to `writer`.
    fn remove(&self, writer: &ContextId, key: &str);

    /// Best-effort check that at least some write capacity remains.
    ///
    /// A `true` result is not a guarantee: writes can still fail with
    /// [`StoreError::QuotaExceeded`](crate::StoreError::QuotaExceeded) and
    /// callers must handle that.
    fn has_quota(&self) -> bool;

    /// Subscribe to change notifications.
    ///
    /// The receiver sees every write and removal, including the subscriber's
    /// own; consumers filter by [`StoreChange::writer`] to drop self-echoes.
    fn subscribe(&self) -> broadcast::Receiver<StoreChange>;

    /// Write a JSON value, serialized through [`write_string`](Self::write_string).
    fn write_json(
        &self,
        writer: &ContextId,
        key: &str,
        value: &serde_json::Value,
    ) -> StoreResult<()> {
        let text = serde_json::to_string(value)?;
        self.write_string(writer, key, &text)
    }
}
