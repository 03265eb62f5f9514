//! The cross-context sync coordinator.

use crate::dirty::mark_transactions_dirty;
use crate::retry::{backoff_delay, RetryEntry};
use crate::{LockRecord, SyncError, SyncEvent, SyncEventType, SyncResult};
use ledger_sync_state::{
    ListenerId, NotificationAction, OperationId, StateUpdate, SyncStateManager, SyncStatus,
};
use ledger_sync_store::{ContextId, SharedStore, StoreChange, StoreError, StoreKeys};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep_until, Duration, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Capacity of the notify command channel.
const COMMAND_QUEUE_CAPACITY: usize = 256;

/// Timing and retry configuration for the coordinator.
///
/// # Backoff
///
/// The delay before the k-th retry is `retry_delay * 2^(k-1)`, capped at
/// `retry_delay_max`. With defaults: 1s, 2s, 4s.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Window within which same-type notifications coalesce into one write.
    pub debounce_window: Duration,
    /// How long an emitted event stays in the store before removal; must be
    /// long enough for other contexts to observe the change notification.
    pub cleanup_delay: Duration,
    /// Age after which a lock record is treated as abandoned and stealable.
    pub lock_timeout: Duration,
    /// Base delay for retry backoff.
    pub retry_delay: Duration,
    /// Cap on the backoff growth.
    pub retry_delay_max: Duration,
    /// Retries after the initial attempt before an operation fails
    /// terminally.
    pub max_retries: u32,
    /// Granularity of the retry due-check ticker.
    pub retry_tick: Duration,
    /// Report a live foreign lock as a conflict instead of a retryable
    /// failure.
    pub conflict_detection: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            debounce_window: Duration::from_millis(300),
            cleanup_delay: Duration::from_millis(200),
            lock_timeout: Duration::from_secs(5),
            retry_delay: Duration::from_secs(1),
            retry_delay_max: Duration::from_secs(30),
            max_retries: 3,
            retry_tick: Duration::from_millis(50),
            conflict_detection: true,
        }
    }
}

enum Command {
    Notify(SyncEvent),
    Dispose,
}

type EventListener = Arc<dyn Fn(&SyncEvent) + Send + Sync>;
type ListenerMap = HashMap<SyncEventType, HashMap<ListenerId, EventListener>>;

/// Coordinates transaction-change propagation for one execution context.
///
/// Construct one per context, inject the shared store and state manager,
/// call [`start()`](Self::start) inside a Tokio runtime, and call
/// [`dispose()`](Self::dispose) exactly once at shutdown (also invoked by
/// `Drop` as a safety net).
///
/// `notify_*` entry points are non-blocking and fire-and-forget: outcomes
/// are reported through the injected
/// [`SyncStateManager`], never as errors to the caller.
pub struct SyncCoordinator {
    config: CoordinatorConfig,
    store: Arc<dyn SharedStore>,
    state: Arc<SyncStateManager>,
    context_id: ContextId,
    listeners: Arc<Mutex<ListenerMap>>,
    version: Arc<AtomicU64>,
    sender: mpsc::Sender<Command>,
    receivers: Mutex<Option<(mpsc::Receiver<Command>, broadcast::Receiver<StoreChange>)>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl SyncCoordinator {
    /// Create a coordinator over `store`, reporting through `state`.
    ///
    /// Seeds the data-version counter from the store so a newly opened
    /// context continues the same sequence space. Subscribes to store
    /// changes immediately; nothing is processed until
    /// [`start()`](Self::start).
    pub fn new(
        store: Arc<dyn SharedStore>,
        state: Arc<SyncStateManager>,
        config: CoordinatorConfig,
    ) -> Self {
        let (sender, command_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let change_rx = store.subscribe();
        let seed = store
            .read_string(StoreKeys::DATA_VERSION)
            .and_then(|raw| raw.parse::<u64>().ok())
            .unwrap_or(0);

        Self {
            config,
            store,
            state,
            context_id: ContextId::generate(),
            listeners: Arc::new(Mutex::new(HashMap::new())),
            version: Arc::new(AtomicU64::new(seed)),
            sender,
            receivers: Mutex::new(Some((command_rx, change_rx))),
            worker: Mutex::new(None),
            disposed: AtomicBool::new(false),
        }
    }

    /// Spawn the background worker loop.
    ///
    /// # Panics
    ///
    /// Panics if called more than once.
    pub fn start(&self) {
        let (command_rx, change_rx) = self
            .receivers
            .lock()
            .expect("lock poisoned")
            .take()
            .expect("SyncCoordinator already started");

        let worker = Worker {
            config: self.config.clone(),
            store: self.store.clone(),
            state: self.state.clone(),
            context_id: self.context_id.clone(),
            listeners: self.listeners.clone(),
            version: self.version.clone(),
            sender: self.sender.clone(),
            pending: HashMap::new(),
            flush_at: None,
            retry_queue: HashMap::new(),
            cleanup_tasks: Vec::new(),
        };

        let handle = tokio::spawn(worker.run(command_rx, change_rx));
        *self.worker.lock().expect("lock poisoned") = Some(handle);
        info!(context_id = %self.context_id, "sync coordinator started");
    }

    /// The context id this coordinator writes under.
    pub fn context_id(&self) -> &ContextId {
        &self.context_id
    }

    /// Subscribe to events of one type, local or cross-context.
    pub fn on_event(
        &self,
        event_type: SyncEventType,
        callback: impl Fn(&SyncEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        let id = ListenerId::next();
        self.listeners
            .lock()
            .expect("lock poisoned")
            .entry(event_type)
            .or_default()
            .insert(id, Arc::new(callback));
        id
    }

    /// Remove an event listener.
    pub fn unsubscribe(&self, id: ListenerId) {
        let mut listeners = self.listeners.lock().expect("lock poisoned");
        for per_type in listeners.values_mut() {
            per_type.remove(&id);
        }
    }

    /// Announce a created transaction. Non-blocking; returns the operation
    /// id correlating the eventual outcome in the state manager.
    pub fn notify_transaction_added(
        &self,
        data: Option<serde_json::Value>,
        confirmed: bool,
    ) -> OperationId {
        self.enqueue(SyncEventType::TransactionAdded, data, confirmed)
    }

    /// Announce a deleted transaction.
    pub fn notify_transaction_deleted(
        &self,
        data: Option<serde_json::Value>,
        confirmed: bool,
    ) -> OperationId {
        self.enqueue(SyncEventType::TransactionDeleted, data, confirmed)
    }

    /// Announce a modified transaction.
    pub fn notify_transaction_updated(
        &self,
        data: Option<serde_json::Value>,
        confirmed: bool,
    ) -> OperationId {
        self.enqueue(SyncEventType::TransactionUpdated, data, confirmed)
    }

    fn enqueue(
        &self,
        event_type: SyncEventType,
        data: Option<serde_json::Value>,
        confirmed: bool,
    ) -> OperationId {
        let event = SyncEvent::new(
            event_type,
            data,
            confirmed,
            self.version.load(Ordering::SeqCst),
        );
        let operation_id = event.operation_id.clone();

        if self.disposed.load(Ordering::SeqCst) {
            debug!(operation_id = %operation_id, "notify ignored, coordinator disposed");
            return operation_id;
        }
        if let Err(err) = self.sender.try_send(Command::Notify(event)) {
            warn!(operation_id = %operation_id, error = %err, "notify dropped, worker unavailable");
        }
        operation_id
    }

    /// The current local data-version counter.
    pub fn data_version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// Deterministic teardown: stops the worker, drops pending and retry
    /// queues, cancels timers, and clears listeners. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.sender.try_send(Command::Dispose).is_err() {
            if let Some(handle) = self.worker.lock().expect("lock poisoned").take() {
                handle.abort();
            }
        }
        self.listeners.lock().expect("lock poisoned").clear();
        info!(context_id = %self.context_id, "sync coordinator disposed");
    }
}

impl Drop for SyncCoordinator {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Background worker owning all mutable coordination state.
///
/// Single-task: the debounce queue, retry queue, and ingestion all run on
/// one select loop, so no further locking is needed inside.
struct Worker {
    config: CoordinatorConfig,
    store: Arc<dyn SharedStore>,
    state: Arc<SyncStateManager>,
    context_id: ContextId,
    listeners: Arc<Mutex<ListenerMap>>,
    version: Arc<AtomicU64>,
    sender: mpsc::Sender<Command>,
    /// Debounced events, coalesced by type, newest timestamp wins.
    pending: HashMap<SyncEventType, SyncEvent>,
    /// Deadline armed by the first pending event.
    flush_at: Option<Instant>,
    /// Operations awaiting a backoff-delayed re-attempt.
    retry_queue: HashMap<OperationId, RetryEntry>,
    cleanup_tasks: Vec<JoinHandle<()>>,
}

impl Worker {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut changes: broadcast::Receiver<StoreChange>,
    ) {
        let mut ticker = interval(self.config.retry_tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let flush_at = self.flush_at;
            tokio::select! {
                maybe_cmd = commands.recv() => match maybe_cmd {
                    Some(Command::Notify(event)) => self.queue_event(event),
                    Some(Command::Dispose) | None => break,
                },
                () = async {
                    match flush_at {
                        Some(at) => sleep_until(at).await,
                        None => std::future::pending().await,
                    }
                } => self.flush().await,
                change = changes.recv() => match change {
                    Ok(change) => self.ingest_change(change),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "store change stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = ticker.tick() => self.run_due_retries().await,
            }
        }

        self.teardown();
    }

    fn teardown(&mut self) {
        for task in self.cleanup_tasks.drain(..) {
            task.abort();
        }
        self.pending.clear();
        self.retry_queue.clear();
        self.listeners.lock().expect("lock poisoned").clear();
        debug!(context_id = %self.context_id, "sync worker stopped");
    }

    fn queue_event(&mut self, event: SyncEvent) {
        match self.pending.entry(event.event_type) {
            Entry::Occupied(mut slot) => {
                // Coalesce by type, keep newest.
                if event.timestamp_ms >= slot.get().timestamp_ms {
                    debug!(event_type = ?event.event_type, "coalescing debounced event");
                    slot.insert(event);
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(event);
            }
        }
        if self.flush_at.is_none() {
            self.flush_at = Some(Instant::now() + self.config.debounce_window);
        }
    }

    async fn flush(&mut self) {
        self.flush_at = None;
        let events: Vec<SyncEvent> = self.pending.drain().map(|(_, event)| event).collect();
        for event in events {
            self.attempt_emit(event).await;
        }
    }

    async fn run_due_retries(&mut self) {
        let now = Instant::now();
        let due: Vec<OperationId> = self
            .retry_queue
            .iter()
            .filter(|(_, entry)| entry.is_due(now))
            .map(|(op, _)| op.clone())
            .collect();
        for op in due {
            if let Some(entry) = self.retry_queue.remove(&op) {
                debug!(
                    operation_id = %op,
                    retry_count = entry.event.retry_count,
                    "retrying sync operation"
                );
                self.attempt_emit(entry.event).await;
            }
        }
    }

    /// One full emit attempt: quota check, lock, write, fan-out, cleanup.
    /// Failures route into the retry queue; contention becomes a conflict.
    async fn attempt_emit(&mut self, event: SyncEvent) {
        let op = event.operation_id.clone();

        if !self.store.has_quota() {
            warn!(operation_id = %op, "store quota exhausted before write");
            self.handle_failure(event, SyncError::QuotaExhausted);
            return;
        }

        match self.try_acquire_lock(&op) {
            Ok(None) => {}
            Ok(Some(holder)) => {
                if self.config.conflict_detection {
                    debug!(operation_id = %op, holder = %holder, "sync lock busy, reporting conflict");
                    let sender = self.sender.clone();
                    let retry_event = event.clone();
                    let action = NotificationAction::new("Retry", move || {
                        let _ = sender.try_send(Command::Notify(retry_event.clone()));
                    });
                    self.state.sync_conflict(
                        &op,
                        "Another window is syncing changes",
                        Some(action),
                    );
                } else {
                    self.handle_failure(event, SyncError::LockHeld { holder });
                }
                return;
            }
            Err(err) => {
                self.handle_failure(event, err);
                return;
            }
        }

        self.state
            .start_sync(&op, Some("Syncing transaction changes"));

        match self.write_event(event.clone()) {
            Ok(written) => {
                fan_out(&self.listeners, &written);
                self.schedule_cleanup(&op);
                self.retry_queue.remove(&op);
                self.state.sync_success(&op, None, false);
                debug!(operation_id = %op, version = written.version, "sync event emitted");
            }
            Err(err) => {
                self.release_lock(&op);
                self.handle_failure(event, err);
            }
        }
    }

    /// Optimistic lock acquisition: `Ok(None)` on success, `Ok(Some(holder))`
    /// when a live foreign lock exists. Stale and malformed records are
    /// stolen.
    fn try_acquire_lock(&self, operation_id: &OperationId) -> SyncResult<Option<OperationId>> {
        if let Some(raw) = self.store.read_string(StoreKeys::SYNC_LOCK) {
            if let Ok(lock) = serde_json::from_str::<LockRecord>(&raw) {
                if !lock.is_stale(self.config.lock_timeout.as_millis() as i64) {
                    return Ok(Some(lock.operation_id));
                }
                debug!(stale_holder = %lock.operation_id, "stealing stale sync lock");
            }
        }

        let record =
            serde_json::to_value(LockRecord::acquire(operation_id)).map_err(StoreError::from)?;
        self.store
            .write_json(&self.context_id, StoreKeys::SYNC_LOCK, &record)?;
        Ok(None)
    }

    /// Remove the lock record if this operation owns it. Malformed records
    /// are removed too; a live foreign lock is left alone.
    fn release_lock(&self, operation_id: &OperationId) {
        let Some(raw) = self.store.read_string(StoreKeys::SYNC_LOCK) else {
            return;
        };
        if let Ok(lock) = serde_json::from_str::<LockRecord>(&raw) {
            if lock.operation_id != *operation_id {
                return;
            }
        }
        self.store.remove(&self.context_id, StoreKeys::SYNC_LOCK);
    }

    /// Write the versioned event, advance and persist the version counter,
    /// and stamp the dirty flag. Returns the event as written.
    fn write_event(&self, mut event: SyncEvent) -> SyncResult<SyncEvent> {
        let next_version = self.version.load(Ordering::SeqCst) + 1;
        event.version = next_version;

        let payload = serde_json::to_value(&event).map_err(StoreError::from)?;
        self.store
            .write_json(&self.context_id, StoreKeys::SYNC_EVENT, &payload)?;
        self.store.write_string(
            &self.context_id,
            StoreKeys::DATA_VERSION,
            &next_version.to_string(),
        )?;
        self.version.store(next_version, Ordering::SeqCst);
        mark_transactions_dirty(self.store.as_ref(), &self.context_id);
        Ok(event)
    }

    fn schedule_cleanup(&mut self, operation_id: &OperationId) {
        self.cleanup_tasks.retain(|task| !task.is_finished());

        let store = self.store.clone();
        let ctx = self.context_id.clone();
        let op = operation_id.clone();
        let delay = self.config.cleanup_delay;
        self.cleanup_tasks.push(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            store.remove(&ctx, StoreKeys::SYNC_EVENT);
            let ours = match store.read_string(StoreKeys::SYNC_LOCK) {
                Some(raw) => serde_json::from_str::<LockRecord>(&raw)
                    .map(|lock| lock.operation_id == op)
                    .unwrap_or(true),
                None => false,
            };
            if ours {
                store.remove(&ctx, StoreKeys::SYNC_LOCK);
            }
        }));
    }

    /// Route a failed attempt into the retry queue, or report it terminally
    /// once the bound is exceeded.
    fn handle_failure(&mut self, mut event: SyncEvent, cause: SyncError) {
        let op = event.operation_id.clone();
        self.release_lock(&op);
        event.retry_count += 1;

        if event.retry_count > self.config.max_retries {
            let terminal = SyncError::RetriesExhausted {
                operation_id: op.clone(),
                attempts: event.retry_count,
                cause: cause.to_string(),
            };
            error!(
                operation_id = %op,
                attempts = event.retry_count,
                error = %cause,
                "sync retries exhausted"
            );
            self.retry_queue.remove(&op);
            self.state.sync_error(&op, &terminal.to_string(), None);
            return;
        }

        let delay = backoff_delay(
            event.retry_count,
            self.config.retry_delay,
            self.config.retry_delay_max,
        );
        warn!(
            operation_id = %op,
            retry_count = event.retry_count,
            delay_ms = delay.as_millis() as u64,
            error = %cause,
            "sync attempt failed, scheduling retry"
        );
        self.state.update_state(
            StateUpdate {
                status: Some(SyncStatus::Syncing),
                message: Some(format!(
                    "Retrying sync ({}/{})",
                    event.retry_count, self.config.max_retries
                )),
                error: Some(cause.to_string()),
                ..StateUpdate::default()
            },
            Some(&op),
        );
        self.retry_queue.insert(op, RetryEntry::new(event, delay));
    }

    /// React to a store change authored by another context: fan the event
    /// out locally without writing, locking, or version bumps.
    fn ingest_change(&mut self, change: StoreChange) {
        if change.writer == self.context_id || change.key != StoreKeys::SYNC_EVENT {
            return;
        }
        // Removals are the other context's cleanup.
        let Some(raw) = change.new_value else {
            return;
        };

        match serde_json::from_str::<SyncEvent>(&raw) {
            Ok(event) => {
                debug!(
                    operation_id = %event.operation_id,
                    event_type = ?event.event_type,
                    writer = %change.writer,
                    "ingested cross-context sync event"
                );
                // Keep the advisory counter roughly in step with observed
                // traffic.
                self.version.fetch_max(event.version, Ordering::SeqCst);
                fan_out(&self.listeners, &event);
            }
            Err(err) => {
                warn!(
                    writer = %change.writer,
                    error = %err,
                    "malformed sync event payload from another context"
                );
                self.state.update_state(
                    StateUpdate {
                        status: Some(SyncStatus::Error),
                        message: Some("storage-parse-error".to_string()),
                        error: Some(SyncError::Parse(err).to_string()),
                        ..StateUpdate::default()
                    },
                    None,
                );
            }
        }
    }
}

/// Deliver an event to every listener of its type, isolating panics so one
/// broken subscriber cannot stop delivery to the rest.
fn fan_out(listeners: &Mutex<ListenerMap>, event: &SyncEvent) {
    let targets: Vec<EventListener> = {
        let map = listeners.lock().expect("lock poisoned");
        map.get(&event.event_type)
            .map(|per_type| per_type.values().cloned().collect())
            .unwrap_or_default()
    };
    for listener in targets {
        if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
            warn!(event_type = ?event.event_type, "event listener panicked");
        }
    }
}
