//! Retry scheduling with exponential backoff.

use crate::SyncEvent;
use tokio::time::{Duration, Instant};

/// One operation currently scheduled for re-attempt.
///
/// Created on the first failure of an operation, replaced on repeated
/// failure, removed on success or when the retry bound is exceeded.
#[derive(Debug, Clone)]
pub(crate) struct RetryEntry {
    /// The event to re-emit, carrying its incremented `retry_count`.
    pub event: SyncEvent,
    /// When the re-attempt is due on the Tokio clock.
    pub due: Instant,
}

impl RetryEntry {
    pub fn new(event: SyncEvent, delay: Duration) -> Self {
        Self {
            event,
            due: Instant::now() + delay,
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.due
    }
}

/// Delay before the k-th retry: `base * 2^(k-1)`, saturating, capped at
/// `max`.
pub(crate) fn backoff_delay(retry_count: u32, base: Duration, max: Duration) -> Duration {
    if retry_count == 0 {
        return Duration::ZERO;
    }
    let base_ms = base.as_millis() as u64;
    let max_ms = max.as_millis() as u64;
    let multiplier = 1u64
        .checked_shl(retry_count.saturating_sub(1))
        .unwrap_or(u64::MAX);
    let delay_ms = base_ms.saturating_mul(multiplier).min(max_ms);
    Duration::from_millis(delay_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SyncEventType;

    const BASE: Duration = Duration::from_secs(1);
    const MAX: Duration = Duration::from_secs(30);

    #[test]
    fn backoff_doubles_per_retry() {
        assert_eq!(backoff_delay(0, BASE, MAX), Duration::ZERO);
        assert_eq!(backoff_delay(1, BASE, MAX), Duration::from_secs(1));
        assert_eq!(backoff_delay(2, BASE, MAX), Duration::from_secs(2));
        assert_eq!(backoff_delay(3, BASE, MAX), Duration::from_secs(4));
        assert_eq!(backoff_delay(4, BASE, MAX), Duration::from_secs(8));
    }

    #[test]
    fn backoff_caps_at_max() {
        assert_eq!(backoff_delay(6, BASE, MAX), Duration::from_secs(30));
        assert_eq!(backoff_delay(100, BASE, MAX), Duration::from_secs(30));
        assert_eq!(backoff_delay(u32::MAX, BASE, MAX), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn entry_due_after_delay() {
        let event = SyncEvent::new(SyncEventType::TransactionAdded, None, true, 0);
        let entry = RetryEntry::new(event, Duration::from_secs(2));

        assert!(!entry.is_due(Instant::now()));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(entry.is_due(Instant::now()));
    }
}
