//! In-process shared store backend.

use crate::{ContextId, SharedStore, StoreChange, StoreError, StoreResult};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::trace;

/// Capacity of the change-notification channel.
const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Default byte budget, mirroring a typical per-origin browser store.
pub const DEFAULT_CAPACITY_BYTES: usize = 5 * 1024 * 1024;

/// In-memory [`SharedStore`] with a byte quota.
///
/// Backs tests and single-process hosts that broker several contexts over
/// one store. Writes that would push the total of key + value bytes over
/// the configured capacity fail with [`StoreError::QuotaExceeded`].
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
    capacity_bytes: usize,
    changes: broadcast::Sender<StoreChange>,
}

impl MemoryStore {
    /// Create a store with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY_BYTES)
    }

    /// Create a store with an explicit byte budget.
    pub fn with_capacity(capacity_bytes: usize) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity_bytes,
            changes,
        }
    }

    /// Bytes currently occupied by keys and values.
    pub fn used_bytes(&self) -> usize {
        let entries = self.entries.lock().expect("lock poisoned");
        Self::usage_of(&entries)
    }

    fn usage_of(entries: &HashMap<String, String>) -> usize {
        entries.iter().map(|(k, v)| k.len() + v.len()).sum()
    }

    fn publish(&self, change: StoreChange) {
        // No receivers is fine; a lone context has nobody to notify.
        let _ = self.changes.send(change);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedStore for MemoryStore {
    fn read_string(&self, key: &str) -> Option<String> {
        self.entries.lock().expect("lock poisoned").get(key).cloned()
    }

    fn write_string(&self, writer: &ContextId, key: &str, value: &str) -> StoreResult<()> {
        {
            let mut entries = self.entries.lock().expect("lock poisoned");
            let existing = entries.get(key).map(|v| key.len() + v.len()).unwrap_or(0);
            let used = Self::usage_of(&entries) - existing;
            let needed = key.len() + value.len();
            if used + needed > self.capacity_bytes {
                return Err(StoreError::QuotaExceeded {
                    needed,
                    available: self.capacity_bytes.saturating_sub(used),
                });
            }
            entries.insert(key.to_string(), value.to_string());
        }

        trace!(writer = %writer, key, "store write");
        self.publish(StoreChange {
            key: key.to_string(),
            new_value: Some(value.to_string()),
            writer: writer.clone(),
        });
        Ok(())
    }

    fn remove(&self, writer: &ContextId, key: &str) {
        let removed = self
            .entries
            .lock()
            .expect("lock poisoned")
            .remove(key)
            .is_some();

        if removed {
            trace!(writer = %writer, key, "store remove");
            self.publish(StoreChange {
                key: key.to_string(),
                new_value: None,
                writer: writer.clone(),
            });
        }
    }

    fn has_quota(&self) -> bool {
        self.used_bytes() < self.capacity_bytes
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}
