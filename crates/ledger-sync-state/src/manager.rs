//! Process-wide sync state bookkeeping and listener fan-out.

use crate::{
    Notification, NotificationAction, NotificationKind, OperationId, StateUpdate, SyncState,
    SyncStatus,
};
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::Duration;
use tracing::{debug, warn};

/// Handle returned by listener registration, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Allocate a process-unique listener id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

type StateListener = Arc<dyn Fn(&SyncState) + Send + Sync>;
type NotificationListener = Arc<dyn Fn(&Notification) + Send + Sync>;

/// Configuration for history retention and the success auto-revert.
#[derive(Debug, Clone)]
pub struct StateManagerConfig {
    /// Maximum retained history entries; oldest are evicted.
    pub max_history: usize,
    /// How long a `Success` state lingers before reverting to `Idle`.
    pub success_revert_delay: Duration,
}

impl Default for StateManagerConfig {
    fn default() -> Self {
        Self {
            max_history: 50,
            success_revert_delay: Duration::from_secs(3),
        }
    }
}

struct Inner {
    current: SyncState,
    history: VecDeque<SyncState>,
    operation_states: HashMap<OperationId, SyncState>,
}

/// Observable state machine for sync operations.
///
/// Tracks one "current" state for simple UI binding, a per-operation
/// snapshot map so concurrent operations do not lose their individual
/// outcomes, and a bounded FIFO history. Shared behind an `Arc`; all
/// methods take `&self`.
///
/// This component never initiates I/O. Failures reach it from the
/// coordinator; UI reaches it through [`on_state_change`](Self::on_state_change)
/// and [`on_notification`](Self::on_notification).
pub struct SyncStateManager {
    config: StateManagerConfig,
    inner: Mutex<Inner>,
    state_listeners: Mutex<HashMap<ListenerId, StateListener>>,
    notification_listeners: Mutex<HashMap<ListenerId, NotificationListener>>,
}

impl SyncStateManager {
    /// Create a manager with the given configuration.
    pub fn new(config: StateManagerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                current: SyncState::idle(),
                history: VecDeque::new(),
                operation_states: HashMap::new(),
            }),
            state_listeners: Mutex::new(HashMap::new()),
            notification_listeners: Mutex::new(HashMap::new()),
        }
    }

    /// Register a state listener.
    ///
    /// The listener is immediately invoked with the current state
    /// (replay-on-subscribe), then on every subsequent transition.
    pub fn on_state_change(
        &self,
        listener: impl Fn(&SyncState) + Send + Sync + 'static,
    ) -> ListenerId {
        let id = ListenerId::next();
        let listener: StateListener = Arc::new(listener);
        self.state_listeners
            .lock()
            .expect("lock poisoned")
            .insert(id, listener.clone());

        let snapshot = self.current_state();
        invoke_isolated(|| listener(&snapshot), "state");
        id
    }

    /// Remove a state listener.
    pub fn unsubscribe_state(&self, id: ListenerId) {
        self.state_listeners
            .lock()
            .expect("lock poisoned")
            .remove(&id);
    }

    /// Register a notification listener.
    pub fn on_notification(
        &self,
        listener: impl Fn(&Notification) + Send + Sync + 'static,
    ) -> ListenerId {
        let id = ListenerId::next();
        self.notification_listeners
            .lock()
            .expect("lock poisoned")
            .insert(id, Arc::new(listener));
        id
    }

    /// Remove a notification listener.
    pub fn unsubscribe_notification(&self, id: ListenerId) {
        self.notification_listeners
            .lock()
            .expect("lock poisoned")
            .remove(&id);
    }

    /// Merge `update` into the current state, stamp a fresh timestamp,
    /// append to history, record a per-operation snapshot if an id is
    /// given, and synchronously fan out to all state listeners.
    pub fn update_state(&self, update: StateUpdate, operation_id: Option<&OperationId>) {
        let snapshot = {
            let mut inner = self.inner.lock().expect("lock poisoned");
            update.apply(&mut inner.current);
            inner.current.timestamp = Utc::now();
            if let Some(op) = operation_id {
                inner.current.operation_id = Some(op.clone());
            }

            let snapshot = inner.current.clone();
            inner.history.push_back(snapshot.clone());
            while inner.history.len() > self.config.max_history {
                inner.history.pop_front();
            }
            if let Some(op) = operation_id {
                inner.operation_states.insert(op.clone(), snapshot.clone());
            }
            snapshot
        };

        debug!(
            status = ?snapshot.status,
            operation_id = snapshot.operation_id.as_ref().map(|o| o.as_str()),
            "sync state transition"
        );
        self.fan_out_state(&snapshot);
    }

    fn fan_out_state(&self, state: &SyncState) {
        let listeners: Vec<StateListener> = self
            .state_listeners
            .lock()
            .expect("lock poisoned")
            .values()
            .cloned()
            .collect();
        for listener in listeners {
            invoke_isolated(|| listener(state), "state");
        }
    }

    /// Push a one-shot notification to all notification listeners.
    pub fn notify(&self, notification: Notification) {
        let listeners: Vec<NotificationListener> = self
            .notification_listeners
            .lock()
            .expect("lock poisoned")
            .values()
            .cloned()
            .collect();
        for listener in listeners {
            invoke_isolated(|| listener(&notification), "notification");
        }
    }

    /// Mark an operation as syncing.
    pub fn start_sync(&self, operation_id: &OperationId, message: Option<&str>) {
        self.update_state(
            StateUpdate {
                status: Some(SyncStatus::Syncing),
                message: Some(message.unwrap_or("Syncing changes").to_string()),
                clear_error: true,
                clear_progress: true,
                ..StateUpdate::default()
            },
            Some(operation_id),
        );
    }

    /// Mark an operation as succeeded.
    ///
    /// After `success_revert_delay` the global status reverts to `Idle`,
    /// but only if no newer transition has become current in the meantime;
    /// the revert never clobbers a later operation's state.
    ///
    /// Must be called within a Tokio runtime (the revert is a spawned task).
    pub fn sync_success(
        self: &Arc<Self>,
        operation_id: &OperationId,
        message: Option<&str>,
        show_notification: bool,
    ) {
        self.update_state(
            StateUpdate {
                status: Some(SyncStatus::Success),
                message: Some(message.unwrap_or("Changes synced").to_string()),
                progress: Some(100),
                clear_error: true,
                ..StateUpdate::default()
            },
            Some(operation_id),
        );

        if show_notification {
            self.notify(Notification::new(
                NotificationKind::Success,
                message.unwrap_or("Changes synced"),
            ));
        }

        let manager = self.clone();
        let op = operation_id.clone();
        let recorded_at = manager.current_state().timestamp;
        tokio::spawn(async move {
            tokio::time::sleep(manager.config.success_revert_delay).await;
            let revert = {
                let inner = manager.inner.lock().expect("lock poisoned");
                inner.current.status == SyncStatus::Success
                    && inner.current.operation_id.as_ref() == Some(&op)
                    && inner.current.timestamp == recorded_at
            };
            if revert {
                manager.update_state(
                    StateUpdate {
                        status: Some(SyncStatus::Idle),
                        clear_progress: true,
                        ..StateUpdate::default()
                    },
                    None,
                );
            }
        });
    }

    /// Mark an operation as terminally failed.
    ///
    /// The error notification carries `retry_action` when the caller can
    /// offer a retry button.
    pub fn sync_error(
        &self,
        operation_id: &OperationId,
        error: &str,
        retry_action: Option<NotificationAction>,
    ) {
        self.update_state(
            StateUpdate {
                status: Some(SyncStatus::Error),
                message: Some("Sync failed".to_string()),
                error: Some(error.to_string()),
                clear_progress: true,
                ..StateUpdate::default()
            },
            Some(operation_id),
        );

        let mut notification = Notification::new(NotificationKind::Error, error);
        if let Some(action) = retry_action {
            notification = notification.with_action(action);
        }
        self.notify(notification);
    }

    /// Report cross-context contention for an operation.
    pub fn sync_conflict(
        &self,
        operation_id: &OperationId,
        message: &str,
        resolve_action: Option<NotificationAction>,
    ) {
        self.update_state(
            StateUpdate {
                status: Some(SyncStatus::Conflict),
                message: Some(message.to_string()),
                clear_progress: true,
                ..StateUpdate::default()
            },
            Some(operation_id),
        );

        let mut notification = Notification::new(NotificationKind::Warning, message);
        if let Some(action) = resolve_action {
            notification = notification.with_action(action);
        }
        self.notify(notification);
    }

    /// Update progress for an operation, clamped to 100.
    pub fn update_progress(&self, operation_id: &OperationId, pct: u8) {
        self.update_state(
            StateUpdate {
                progress: Some(pct),
                ..StateUpdate::default()
            },
            Some(operation_id),
        );
    }

    /// The current state.
    pub fn current_state(&self) -> SyncState {
        self.inner.lock().expect("lock poisoned").current.clone()
    }

    /// The last recorded state for an operation, if any.
    pub fn operation_state(&self, operation_id: &OperationId) -> Option<SyncState> {
        self.inner
            .lock()
            .expect("lock poisoned")
            .operation_states
            .get(operation_id)
            .cloned()
    }

    /// Recorded history, newest last, optionally limited to the most
    /// recent `limit` entries.
    pub fn history(&self, limit: Option<usize>) -> Vec<SyncState> {
        let inner = self.inner.lock().expect("lock poisoned");
        let skip = limit
            .map(|l| inner.history.len().saturating_sub(l))
            .unwrap_or(0);
        inner.history.iter().skip(skip).cloned().collect()
    }

    /// Drop all history entries.
    pub fn clear_history(&self) {
        self.inner.lock().expect("lock poisoned").history.clear();
    }

    /// Reset to the initial idle state, dropping history and operation
    /// snapshots, and fan out the idle state.
    pub fn reset(&self) {
        let snapshot = {
            let mut inner = self.inner.lock().expect("lock poisoned");
            inner.current = SyncState::idle();
            inner.history.clear();
            inner.operation_states.clear();
            inner.current.clone()
        };
        self.fan_out_state(&snapshot);
    }
}

impl Default for SyncStateManager {
    fn default() -> Self {
        Self::new(StateManagerConfig::default())
    }
}

/// Run a listener callback, containing panics so one broken subscriber
/// cannot stop delivery to the rest.
fn invoke_isolated(f: impl FnOnce(), channel: &str) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        warn!(channel, "listener panicked during fan-out");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn syncing_update() -> StateUpdate {
        StateUpdate {
            status: Some(SyncStatus::Syncing),
            ..StateUpdate::default()
        }
    }

    #[test]
    fn replay_on_subscribe_delivers_current_state() {
        let manager = SyncStateManager::default();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        manager.on_state_change(move |s| sink.lock().unwrap().push(s.status));

        let states = seen.lock().unwrap();
        assert_eq!(states.as_slice(), &[SyncStatus::Idle]);
    }

    #[test]
    fn transitions_fan_out_to_all_listeners() {
        let manager = SyncStateManager::default();
        let count = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let c = count.clone();
            manager.on_state_change(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }
        count.store(0, Ordering::SeqCst); // discard the replays

        manager.update_state(syncing_update(), None);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn panicking_listener_does_not_stop_delivery() {
        let manager = SyncStateManager::default();
        let delivered = Arc::new(AtomicUsize::new(0));

        manager.on_state_change(|s| {
            if s.status == SyncStatus::Syncing {
                panic!("subscriber bug");
            }
        });
        let d = delivered.clone();
        manager.on_state_change(move |_| {
            d.fetch_add(1, Ordering::SeqCst);
        });
        delivered.store(0, Ordering::SeqCst);

        manager.update_state(syncing_update(), None);
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let manager = SyncStateManager::default();
        let count = Arc::new(AtomicUsize::new(0));

        let c = count.clone();
        let id = manager.on_state_change(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        count.store(0, Ordering::SeqCst);

        manager.unsubscribe_state(id);
        manager.update_state(syncing_update(), None);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn history_is_bounded_fifo() {
        let manager = SyncStateManager::new(StateManagerConfig {
            max_history: 3,
            ..StateManagerConfig::default()
        });

        for i in 0..5u8 {
            manager.update_state(
                StateUpdate {
                    progress: Some(i),
                    ..StateUpdate::default()
                },
                None,
            );
        }

        let history = manager.history(None);
        assert_eq!(history.len(), 3);
        // Oldest entries evicted: progress 2, 3, 4 remain.
        assert_eq!(history[0].progress, Some(2));
        assert_eq!(history[2].progress, Some(4));

        let limited = manager.history(Some(2));
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].progress, Some(3));
    }

    #[test]
    fn operation_snapshots_survive_being_superseded() {
        let manager = SyncStateManager::default();
        let op_a = OperationId::from_string("op-a");
        let op_b = OperationId::from_string("op-b");

        manager.update_state(
            StateUpdate {
                status: Some(SyncStatus::Error),
                error: Some("boom".to_string()),
                ..StateUpdate::default()
            },
            Some(&op_a),
        );
        manager.update_state(syncing_update(), Some(&op_b));

        // op-a is no longer current but its outcome is retained.
        let a = manager.operation_state(&op_a).unwrap();
        assert_eq!(a.status, SyncStatus::Error);
        assert_eq!(a.error.as_deref(), Some("boom"));

        assert_eq!(manager.current_state().operation_id, Some(op_b));
    }

    #[test]
    fn notifications_are_independent_of_state_stream() {
        let manager = SyncStateManager::default();
        let state_count = Arc::new(AtomicUsize::new(0));
        let note_count = Arc::new(AtomicUsize::new(0));

        let sc = state_count.clone();
        manager.on_state_change(move |_| {
            sc.fetch_add(1, Ordering::SeqCst);
        });
        state_count.store(0, Ordering::SeqCst);

        let nc = note_count.clone();
        manager.on_notification(move |_| {
            nc.fetch_add(1, Ordering::SeqCst);
        });

        manager.notify(Notification::new(NotificationKind::Info, "hi"));
        assert_eq!(note_count.load(Ordering::SeqCst), 1);
        assert_eq!(state_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn success_reverts_to_idle_after_delay() {
        let manager = Arc::new(SyncStateManager::default());
        let op = OperationId::generate();

        manager.sync_success(&op, None, false);
        assert_eq!(manager.current_state().status, SyncStatus::Success);

        tokio::time::sleep(manager.config.success_revert_delay + Duration::from_millis(10)).await;
        assert_eq!(manager.current_state().status, SyncStatus::Idle);

        // The per-operation snapshot keeps the success outcome.
        assert_eq!(
            manager.operation_state(&op).unwrap().status,
            SyncStatus::Success
        );
    }

    #[tokio::test(start_paused = true)]
    async fn success_revert_does_not_clobber_newer_operation() {
        let manager = Arc::new(SyncStateManager::default());
        let op_a = OperationId::from_string("op-a");
        let op_b = OperationId::from_string("op-b");

        manager.sync_success(&op_a, None, false);
        manager.start_sync(&op_b, None);

        tokio::time::sleep(manager.config.success_revert_delay + Duration::from_millis(10)).await;
        let current = manager.current_state();
        assert_eq!(current.status, SyncStatus::Syncing);
        assert_eq!(current.operation_id, Some(op_b));
    }

    #[tokio::test]
    async fn sync_success_notification_can_be_suppressed() {
        let manager = Arc::new(SyncStateManager::default());
        let notes = Arc::new(AtomicUsize::new(0));

        let n = notes.clone();
        manager.on_notification(move |_| {
            n.fetch_add(1, Ordering::SeqCst);
        });

        manager.sync_success(&OperationId::generate(), None, false);
        assert_eq!(notes.load(Ordering::SeqCst), 0);

        manager.sync_success(&OperationId::generate(), Some("saved"), true);
        assert_eq!(notes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn sync_error_carries_retry_action() {
        let manager = SyncStateManager::default();
        let op = OperationId::generate();
        let captured: Arc<Mutex<Option<Notification>>> = Arc::new(Mutex::new(None));

        let sink = captured.clone();
        manager.on_notification(move |n| {
            *sink.lock().unwrap() = Some(n.clone());
        });

        let clicked = Arc::new(AtomicUsize::new(0));
        let c = clicked.clone();
        manager.sync_error(
            &op,
            "write refused",
            Some(NotificationAction::new("Retry", move || {
                c.fetch_add(1, Ordering::SeqCst);
            })),
        );

        let note = captured.lock().unwrap().clone().unwrap();
        assert_eq!(note.kind, NotificationKind::Error);
        assert_eq!(note.message, "write refused");
        (note.action.unwrap().on_click)();
        assert_eq!(clicked.load(Ordering::SeqCst), 1);

        let state = manager.operation_state(&op).unwrap();
        assert_eq!(state.status, SyncStatus::Error);
        assert_eq!(state.error.as_deref(), Some("write refused"));
    }

    #[test]
    fn sync_conflict_emits_warning() {
        let manager = SyncStateManager::default();
        let op = OperationId::generate();
        let kinds = Arc::new(Mutex::new(Vec::new()));

        let sink = kinds.clone();
        manager.on_notification(move |n| sink.lock().unwrap().push(n.kind));

        manager.sync_conflict(&op, "Another window is syncing", None);
        assert_eq!(kinds.lock().unwrap().as_slice(), &[NotificationKind::Warning]);
        assert_eq!(manager.current_state().status, SyncStatus::Conflict);
    }

    #[test]
    fn update_progress_clamps() {
        let manager = SyncStateManager::default();
        let op = OperationId::generate();
        manager.update_progress(&op, 150);
        assert_eq!(manager.current_state().progress, Some(100));
    }

    #[test]
    fn reset_restores_idle_and_drops_history() {
        let manager = SyncStateManager::default();
        let op = OperationId::generate();

        manager.update_state(syncing_update(), Some(&op));
        manager.reset();

        assert_eq!(manager.current_state().status, SyncStatus::Idle);
        assert!(manager.history(None).is_empty());
        assert!(manager.operation_state(&op).is_none());
    }
}
