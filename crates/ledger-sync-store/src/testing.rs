//! Test instrumentation for [`SharedStore`] consumers.

use crate::{ContextId, MemoryStore, SharedStore, StoreChange, StoreError, StoreResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::time::Instant;

/// One recorded write attempt, successful or not.
#[derive(Debug, Clone)]
pub struct WriteAttempt {
    /// Key the write targeted.
    pub key: String,
    /// When the attempt happened, on the Tokio clock.
    pub at: Instant,
}

/// A [`SharedStore`] wrapper that records write attempts and can inject
/// failures, for driving the sync layer's retry and quota paths in tests.
///
/// Several wrappers can share one inner [`MemoryStore`], giving each
/// simulated context its own attempt log over common data.
pub struct RecordingStore {
    inner: Arc<MemoryStore>,
    attempts: Mutex<Vec<WriteAttempt>>,
    fail_writes: AtomicBool,
    quota_available: AtomicBool,
}

impl RecordingStore {
    /// Wrap an existing store.
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            attempts: Mutex::new(Vec::new()),
            fail_writes: AtomicBool::new(false),
            quota_available: AtomicBool::new(true),
        }
    }

    /// Make every subsequent write fail with a backend error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Override what [`SharedStore::has_quota`] reports.
    pub fn set_quota_available(&self, available: bool) {
        self.quota_available.store(available, Ordering::SeqCst);
    }

    /// All write attempts against `key`, in order.
    pub fn attempts_for(&self, key: &str) -> Vec<WriteAttempt> {
        self.attempts
            .lock()
            .expect("lock poisoned")
            .iter()
            .filter(|a| a.key == key)
            .cloned()
            .collect()
    }

    /// Number of write attempts against `key`.
    pub fn attempt_count(&self, key: &str) -> usize {
        self.attempts_for(key).len()
    }

    /// Total number of write attempts through this wrapper.
    pub fn total_attempts(&self) -> usize {
        self.attempts.lock().expect("lock poisoned").len()
    }
}

impl SharedStore for RecordingStore {
    fn read_string(&self, key: &str) -> Option<String> {
        self.inner.read_string(key)
    }

    fn write_string(&self, writer: &ContextId, key: &str, value: &str) -> StoreResult<()> {
        self.attempts.lock().expect("lock poisoned").push(WriteAttempt {
            key: key.to_string(),
            at: Instant::now(),
        });

        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("simulated write failure".to_string()));
        }
        self.inner.write_string(writer, key, value)
    }

    fn remove(&self, writer: &ContextId, key: &str) {
        self.inner.remove(writer, key);
    }

    fn has_quota(&self) -> bool {
        self.quota_available.load(Ordering::SeqCst) && self.inner.has_quota()
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.inner.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_attempts_even_when_failing() {
        let store = RecordingStore::new(Arc::new(MemoryStore::new()));
        let ctx = ContextId::generate();

        store.set_fail_writes(true);
        assert!(store.write_string(&ctx, "k", "v").is_err());
        assert!(store.read_string("k").is_none());
        assert_eq!(store.attempt_count("k"), 1);

        store.set_fail_writes(false);
        store.write_string(&ctx, "k", "v").unwrap();
        assert_eq!(store.attempt_count("k"), 2);
        assert_eq!(store.read_string("k").as_deref(), Some("v"));
    }

    #[test]
    fn quota_override_is_reported() {
        let store = RecordingStore::new(Arc::new(MemoryStore::new()));
        assert!(store.has_quota());
        store.set_quota_available(false);
        assert!(!store.has_quota());
    }
}
