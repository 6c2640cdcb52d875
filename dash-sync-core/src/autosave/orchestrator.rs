use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::events::{AutoSaveEvent, EventHandler, EventKind, EventRegistry};
use super::retry::RetryPolicy;
use crate::config::AutoSaveConfig;
use crate::connectivity::Connectivity;
use crate::error::SaveError;
use crate::models::{Layout, OfflineQueueEntry, SavePriority, SaveRequest};
use crate::queue::OfflineQueue;
use crate::storage::{SaveOutcome, StorageGateway};

/// Performs one save attempt for the orchestrator.
#[async_trait]
pub trait SaveExecutor: Send + Sync {
    async fn execute(&self, request: &SaveRequest) -> Result<SaveOutcome, SaveError>;
}

/// Writes straight through the storage gateway.
///
/// Any tier accepting the layout counts as success; only a save that no tier
/// could hold is an error.
pub struct GatewayExecutor {
    gateway: Arc<StorageGateway>,
}

impl GatewayExecutor {
    pub fn new(gateway: Arc<StorageGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl SaveExecutor for GatewayExecutor {
    async fn execute(&self, request: &SaveRequest) -> Result<SaveOutcome, SaveError> {
        let outcome = self
            .gateway
            .save_with_retry(&request.user_id, &request.layout)
            .await;
        if outcome.success {
            Ok(outcome)
        } else {
            Err(SaveError::Storage(outcome.error.unwrap_or_default()))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SavePhase {
    Idle,
    DebouncePending,
    Saving,
}

impl fmt::Display for SavePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SavePhase::Idle => write!(f, "idle"),
            SavePhase::DebouncePending => write!(f, "pending"),
            SavePhase::Saving => write!(f, "saving"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AutoSaveResult {
    Saved(SaveOutcome),
    /// Offline at execute time; the request waits in the offline queue.
    Queued,
    Failed(SaveError),
}

/// One successful save, keyed by the serialized layout.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveRecord {
    pub key: String,
    pub user_id: String,
    pub saved_at: DateTime<Utc>,
    pub duration: Duration,
    pub outcome: SaveOutcome,
}

struct State {
    phase: SavePhase,
    /// At most one request per user, in first-trigger order.
    pending: VecDeque<SaveRequest>,
    timer: Option<JoinHandle<()>>,
    timer_gen: u64,
    saving: bool,
    disposed: bool,
    history: VecDeque<SaveRecord>,
    last_result: Option<AutoSaveResult>,
    results: HashMap<String, AutoSaveResult>,
}

impl State {
    fn has_pending_for(&self, user_id: &str) -> bool {
        self.pending.iter().any(|r| r.user_id == user_id)
    }

    /// Replaces the user's waiting request, or queues a new one behind the
    /// other users' requests.
    fn set_pending(&mut self, request: SaveRequest) {
        match self.pending.iter_mut().find(|r| r.user_id == request.user_id) {
            Some(slot) => *slot = request,
            None => self.pending.push_back(request),
        }
    }
}

struct Inner {
    executor: Arc<dyn SaveExecutor>,
    gateway: Arc<StorageGateway>,
    queue: Arc<OfflineQueue>,
    connectivity: Arc<dyn Connectivity>,
    config: AutoSaveConfig,
    policy: RetryPolicy,
    events: EventRegistry,
    state: Mutex<State>,
    idle: Notify,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

/// Debounced, single-flight auto-save with retry and offline queueing.
///
/// Must be created inside a tokio runtime: it spawns a connectivity watcher,
/// and every trigger arms a timer task.
#[derive(Clone)]
pub struct AutoSave {
    inner: Arc<Inner>,
}

impl AutoSave {
    pub fn new(
        executor: Arc<dyn SaveExecutor>,
        gateway: Arc<StorageGateway>,
        queue: Arc<OfflineQueue>,
        connectivity: Arc<dyn Connectivity>,
        config: AutoSaveConfig,
    ) -> Self {
        let inner = Arc::new(Inner {
            executor,
            gateway,
            queue,
            policy: RetryPolicy::from_config(&config),
            config,
            events: EventRegistry::default(),
            state: Mutex::new(State {
                phase: SavePhase::Idle,
                pending: VecDeque::new(),
                timer: None,
                timer_gen: 0,
                saving: false,
                disposed: false,
                history: VecDeque::new(),
                last_result: None,
                results: HashMap::new(),
            }),
            idle: Notify::new(),
            watcher: Mutex::new(None),
            connectivity,
        });

        let watcher = spawn_connectivity_watcher(&inner);
        *inner.watcher.lock().unwrap_or_else(|e| e.into_inner()) = Some(watcher);

        Self { inner }
    }

    /// Auto-save writing through the gateway directly.
    pub fn with_gateway(
        gateway: Arc<StorageGateway>,
        queue: Arc<OfflineQueue>,
        connectivity: Arc<dyn Connectivity>,
        config: AutoSaveConfig,
    ) -> Self {
        let executor = Arc::new(GatewayExecutor::new(gateway.clone()));
        Self::new(executor, gateway, queue, connectivity, config)
    }

    pub fn trigger(&self, user_id: &str, layout: Layout, priority: SavePriority) {
        self.trigger_request(SaveRequest::new(user_id, layout, priority));
    }

    /// Schedules a save, replacing any request for the same user that has
    /// not started yet. Requests for other users are kept.
    ///
    /// While a save is running the request is held and executed right after
    /// it; otherwise the debounce timer is (re)armed.
    pub fn trigger_request(&self, request: SaveRequest) {
        let mut state = self.inner.state();
        if state.disposed {
            return;
        }

        let delay = match request.priority {
            SavePriority::High => self.inner.config.high_priority_delay(),
            SavePriority::Normal | SavePriority::Low => self.inner.config.debounce(),
        };
        debug!(user_id = %request.user_id, priority = %request.priority, "auto-save triggered");

        state.set_pending(request);
        cancel_timer(&mut state);
        if state.saving {
            return;
        }

        state.phase = SavePhase::DebouncePending;
        let generation = state.timer_gen;
        let inner = Arc::clone(&self.inner);
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut state = inner.state();
                if state.timer_gen != generation {
                    return;
                }
                state.timer = None;
            }
            // the save runs in its own task so cancelling timers never aborts it
            tokio::spawn(async move { inner.run().await });
        }));
    }

    /// Executes any pending request now and waits for in-flight work.
    ///
    /// Returns the result of the last save executed, or `None` if there was
    /// nothing to do.
    pub async fn flush(&self) -> Option<AutoSaveResult> {
        {
            let mut state = self.inner.state();
            if state.disposed {
                return None;
            }
            cancel_timer(&mut state);
            if !state.saving && state.pending.is_empty() {
                return None;
            }
        }

        self.inner.run().await;
        self.inner.wait_idle().await;
        self.inner.state().last_result.clone()
    }

    pub fn has_pending_save(&self) -> bool {
        let state = self.inner.state();
        !state.pending.is_empty() || state.timer.is_some()
    }

    /// Drops every scheduled request. A save already running is not affected.
    pub fn cancel_pending_save(&self) {
        let mut state = self.inner.state();
        cancel_timer(&mut state);
        state.pending.clear();
        if !state.saving {
            state.phase = SavePhase::Idle;
        }
    }

    pub fn on(&self, kind: EventKind, handler: impl Fn(&AutoSaveEvent) + Send + Sync + 'static) {
        let handler: EventHandler = Arc::new(handler);
        self.inner.events.on(kind, handler);
    }

    /// Successful saves, oldest first.
    pub fn history(&self) -> Vec<SaveRecord> {
        self.inner.state().history.iter().cloned().collect()
    }

    pub fn phase(&self) -> SavePhase {
        self.inner.state().phase
    }

    pub fn last_result(&self) -> Option<AutoSaveResult> {
        self.inner.state().last_result.clone()
    }

    /// Result of the most recent save executed for `user_id`.
    pub fn last_result_for(&self, user_id: &str) -> Option<AutoSaveResult> {
        self.inner.state().results.get(user_id).cloned()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.state().disposed
    }

    /// Cancels timers, detaches from connectivity changes and ignores all
    /// further triggers. An in-flight save still runs to completion.
    pub fn dispose(&self) {
        {
            let mut state = self.inner.state();
            if state.disposed {
                return;
            }
            state.disposed = true;
            cancel_timer(&mut state);
            state.pending.clear();
            if !state.saving {
                state.phase = SavePhase::Idle;
            }
        }
        if let Some(watcher) = self.inner.watcher.lock().unwrap_or_else(|e| e.into_inner()).take() {
            watcher.abort();
        }
        debug!("auto-save disposed");
    }
}

fn cancel_timer(state: &mut State) {
    if let Some(timer) = state.timer.take() {
        timer.abort();
    }
    state.timer_gen += 1;
}

fn spawn_connectivity_watcher(inner: &Arc<Inner>) -> JoinHandle<()> {
    let mut rx = inner.connectivity.subscribe();
    let weak: Weak<Inner> = Arc::downgrade(inner);

    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let online = *rx.borrow_and_update();
            let Some(inner) = weak.upgrade() else {
                break;
            };
            if online {
                info!("connectivity restored, replaying offline queue");
                inner.events.emit(&AutoSaveEvent::Online);
                let report = inner
                    .queue
                    .replay(&inner.gateway, inner.connectivity.as_ref())
                    .await;
                if let Some(reason) = report.stopped {
                    warn!(remaining = report.remaining, reason = %reason, "offline replay incomplete");
                }
            } else {
                info!("connectivity lost");
                inner.events.emit(&AutoSaveEvent::Offline);
            }
        }
    })
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Drains pending requests one at a time. Returns at once if another
    /// caller is already draining.
    async fn run(&self) {
        {
            let mut state = self.state();
            if state.saving {
                return;
            }
            state.saving = true;
        }

        loop {
            let request = {
                let mut state = self.state();
                match state.pending.pop_front() {
                    Some(request) => {
                        cancel_timer(&mut state);
                        state.phase = SavePhase::Saving;
                        request
                    }
                    None => {
                        state.saving = false;
                        state.phase = SavePhase::Idle;
                        break;
                    }
                }
            };

            let user_id = request.user_id.clone();
            let result = self.execute(request).await;
            {
                let mut state = self.state();
                state.results.insert(user_id, result.clone());
                state.last_result = Some(result);
            }
        }

        self.idle.notify_waiters();
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if !self.state().saving {
                return;
            }
            notified.await;
        }
    }

    async fn execute(&self, mut request: SaveRequest) -> AutoSaveResult {
        let user_id = request.user_id.clone();
        let started = Instant::now();
        self.events.emit(&AutoSaveEvent::Start {
            user_id: user_id.clone(),
        });

        loop {
            if !self.connectivity.is_online() {
                return self.defer_offline(request);
            }

            let error = match self.executor.execute(&request).await {
                Ok(outcome) => {
                    let duration = started.elapsed();
                    self.record_success(&request, &outcome, duration);
                    self.events.emit(&AutoSaveEvent::Success { user_id, duration });
                    return AutoSaveResult::Saved(outcome);
                }
                Err(error) => error,
            };

            let superseded = self.state().has_pending_for(&user_id);
            if error.is_retryable() && request.retry_count < self.policy.max_retries && !superseded {
                let delay = self.policy.delay(request.retry_count);
                request.retry_count += 1;
                warn!(user_id = %user_id, attempt = request.retry_count, error = %error, "auto-save failed, retrying");
                self.events.emit(&AutoSaveEvent::Retry {
                    user_id: user_id.clone(),
                    attempt: request.retry_count,
                    delay,
                });
                tokio::time::sleep(delay).await;
                if self.state().has_pending_for(&user_id) {
                    debug!(user_id = %user_id, "newer request pending, abandoning retries");
                    return AutoSaveResult::Failed(error);
                }
                continue;
            }

            if superseded {
                debug!(user_id = %user_id, "newer request pending, not retrying");
                return AutoSaveResult::Failed(error);
            }
            warn!(user_id = %user_id, error = %error, "auto-save failed");
            self.events.emit(&AutoSaveEvent::Error {
                user_id,
                error: error.clone(),
            });
            return AutoSaveResult::Failed(error);
        }
    }

    fn defer_offline(&self, request: SaveRequest) -> AutoSaveResult {
        let user_id = request.user_id.clone();
        if let Err(e) = self.gateway.store_local(&user_id, &request.layout) {
            warn!(user_id = %user_id, error = %e, "failed to keep offline copy of layout");
        }
        self.queue.enqueue(OfflineQueueEntry::new(request));
        info!(user_id = %user_id, queued = self.queue.len(), "offline, save queued");
        self.events.emit(&AutoSaveEvent::Offline);
        AutoSaveResult::Queued
    }

    fn record_success(&self, request: &SaveRequest, outcome: &SaveOutcome, duration: Duration) {
        let record = SaveRecord {
            key: serde_json::to_string(&request.layout).unwrap_or_default(),
            user_id: request.user_id.clone(),
            saved_at: Utc::now(),
            duration,
            outcome: outcome.clone(),
        };

        let mut state = self.state();
        state.history.push_back(record);
        while state.history.len() > self.config.history_cap {
            state.history.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::connectivity::ManualConnectivity;
    use crate::models::{Widget, WidgetType};
    use crate::remote::testing::FakeRemote;
    use crate::remote::RemoteError;
    use crate::storage::{KeyValueStore, MemoryStore, PlainCodec, StorageSource};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeExecutor {
        requests: Mutex<Vec<SaveRequest>>,
        failures: Mutex<VecDeque<SaveError>>,
        always_fail: Mutex<Option<SaveError>>,
        delay: Mutex<Duration>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl FakeExecutor {
        fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        fn last_layout(&self) -> Layout {
            self.requests.lock().unwrap().last().unwrap().layout.clone()
        }
    }

    #[async_trait]
    impl SaveExecutor for FakeExecutor {
        async fn execute(&self, request: &SaveRequest) -> Result<SaveOutcome, SaveError> {
            self.requests.lock().unwrap().push(request.clone());
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            let delay = *self.delay.lock().unwrap();
            tokio::time::sleep(delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if let Some(e) = self.always_fail.lock().unwrap().clone() {
                return Err(e);
            }
            if let Some(e) = self.failures.lock().unwrap().pop_front() {
                return Err(e);
            }
            Ok(SaveOutcome {
                success: true,
                source: StorageSource::Database,
                error: None,
            })
        }
    }

    struct Harness {
        autosave: AutoSave,
        executor: Arc<FakeExecutor>,
        gateway: Arc<StorageGateway>,
        remote: Arc<FakeRemote>,
        local: Arc<MemoryStore>,
        queue: Arc<OfflineQueue>,
        connectivity: Arc<ManualConnectivity>,
        events: Arc<Mutex<Vec<AutoSaveEvent>>>,
    }

    fn harness_with(config: AutoSaveConfig) -> Harness {
        let executor = Arc::new(FakeExecutor::default());
        let remote = FakeRemote::new();
        let local = Arc::new(MemoryStore::new());
        let connectivity = Arc::new(ManualConnectivity::new(true));
        let gateway = Arc::new(StorageGateway::new(
            remote.clone(),
            local.clone(),
            Arc::new(MemoryStore::new()),
            connectivity.clone(),
            Arc::new(PlainCodec),
            StorageConfig::default(),
        ));
        let queue = Arc::new(OfflineQueue::open(Arc::new(MemoryStore::new()), 10).unwrap());
        let autosave = AutoSave::new(
            executor.clone(),
            gateway.clone(),
            queue.clone(),
            connectivity.clone(),
            config,
        );

        let events = Arc::new(Mutex::new(Vec::new()));
        for kind in [
            EventKind::Start,
            EventKind::Success,
            EventKind::Retry,
            EventKind::Error,
            EventKind::Offline,
            EventKind::Online,
        ] {
            let sink = events.clone();
            autosave.on(kind, move |event| sink.lock().unwrap().push(event.clone()));
        }

        Harness {
            autosave,
            executor,
            gateway,
            remote,
            local,
            queue,
            connectivity,
            events,
        }
    }

    fn harness() -> Harness {
        harness_with(AutoSaveConfig::default())
    }

    fn layout(n: usize) -> Layout {
        let widgets = (0..n)
            .map(|i| Widget::new(format!("w{}", i), WidgetType::Metrics).at(0, i as u32))
            .collect();
        Layout::new().with_desktop(widgets)
    }

    fn count(h: &Harness, kind: EventKind) -> usize {
        h.events.lock().unwrap().iter().filter(|e| e.kind() == kind).count()
    }

    async fn sleep_ms(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_triggers_coalesce_into_last() {
        let h = harness();
        for n in 1..=5 {
            h.autosave.trigger("u1", layout(n), SavePriority::Normal);
            sleep_ms(300).await;
        }
        assert_eq!(h.executor.calls(), 0);
        assert_eq!(h.autosave.phase(), SavePhase::DebouncePending);

        sleep_ms(2000).await;

        assert_eq!(h.executor.calls(), 1);
        assert_eq!(h.executor.last_layout().desktop.len(), 5);
        assert_eq!(h.autosave.phase(), SavePhase::Idle);
        assert!(!h.autosave.has_pending_save());
    }

    #[tokio::test(start_paused = true)]
    async fn test_triggers_for_different_users_are_all_saved() {
        let h = harness();
        h.autosave.trigger("u1", layout(1), SavePriority::Normal);
        sleep_ms(300).await;
        h.autosave.trigger("u2", layout(2), SavePriority::Normal);
        h.autosave.trigger("u1", layout(3), SavePriority::Normal);

        sleep_ms(5000).await;

        let saved: Vec<(String, usize)> = h
            .executor
            .requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| (r.user_id.clone(), r.layout.desktop.len()))
            .collect();
        assert_eq!(saved, vec![("u1".to_string(), 3), ("u2".to_string(), 2)]);
        assert!(matches!(h.autosave.last_result_for("u1"), Some(AutoSaveResult::Saved(_))));
        assert!(matches!(h.autosave.last_result_for("u2"), Some(AutoSaveResult::Saved(_))));
        assert!(!h.autosave.has_pending_save());
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_users_request_does_not_supersede_retries() {
        let h = harness();
        h.executor
            .failures
            .lock()
            .unwrap()
            .push_back(SaveError::Remote(RemoteError::Timeout));
        *h.executor.delay.lock().unwrap() = Duration::from_millis(500);

        h.autosave.trigger("u1", layout(1), SavePriority::High);
        sleep_ms(200).await;
        h.autosave.trigger("u2", layout(2), SavePriority::Normal);
        sleep_ms(5000).await;

        assert_eq!(count(&h, EventKind::Retry), 1);
        let users: Vec<String> = h
            .executor
            .requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.user_id.clone())
            .collect();
        assert_eq!(users, vec!["u1", "u1", "u2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_high_priority_saves_quickly() {
        let h = harness();
        h.autosave.trigger("u1", layout(1), SavePriority::High);

        sleep_ms(150).await;

        assert_eq!(h.executor.calls(), 1);
        assert_eq!(count(&h, EventKind::Success), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_during_save_runs_after_it() {
        let h = harness();
        *h.executor.delay.lock().unwrap() = Duration::from_secs(1);

        h.autosave.trigger("u1", layout(1), SavePriority::High);
        sleep_ms(200).await;
        assert_eq!(h.autosave.phase(), SavePhase::Saving);

        h.autosave.trigger("u1", layout(2), SavePriority::Normal);
        h.autosave.trigger("u1", layout(3), SavePriority::Normal);
        assert_eq!(h.executor.calls(), 1);

        sleep_ms(2000).await;

        assert_eq!(h.executor.calls(), 2);
        assert_eq!(h.executor.last_layout().desktop.len(), 3);
        assert_eq!(h.executor.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_error_retries_up_to_bound() {
        let h = harness();
        *h.executor.always_fail.lock().unwrap() = Some(SaveError::Remote(RemoteError::Timeout));

        h.autosave.trigger("u1", layout(1), SavePriority::Normal);
        let result = h.autosave.flush().await;

        assert!(matches!(result, Some(AutoSaveResult::Failed(_))));
        assert_eq!(h.executor.calls(), 4);
        assert_eq!(count(&h, EventKind::Retry), 3);
        assert_eq!(count(&h, EventKind::Error), 1);
        let attempts: Vec<u32> = h
            .executor
            .requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.retry_count)
            .collect();
        assert_eq!(attempts, vec![0, 1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_delays_follow_backoff() {
        let h = harness();
        *h.executor.always_fail.lock().unwrap() = Some(SaveError::Storage("503".into()));

        h.autosave.trigger("u1", layout(1), SavePriority::High);
        h.autosave.flush().await;

        let delays: Vec<Duration> = h
            .events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                AutoSaveEvent::Retry { delay, .. } => Some(*delay),
                _ => None,
            })
            .collect();
        assert_eq!(delays.len(), 3);
        for (attempt, delay) in delays.iter().enumerate() {
            let base = Duration::from_millis(1000 << attempt);
            assert!(*delay >= base && *delay <= base + Duration::from_millis(500));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_then_success() {
        let h = harness();
        h.executor
            .failures
            .lock()
            .unwrap()
            .push_back(SaveError::Remote(RemoteError::Network("reset".into())));

        h.autosave.trigger("u1", layout(1), SavePriority::Normal);
        let result = h.autosave.flush().await.unwrap();

        assert!(matches!(result, AutoSaveResult::Saved(_)));
        assert_eq!(h.executor.calls(), 2);
        assert_eq!(count(&h, EventKind::Error), 0);
        assert_eq!(h.autosave.history().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_surfaces_immediately() {
        let h = harness();
        *h.executor.always_fail.lock().unwrap() = Some(SaveError::Validation("x out of range".into()));

        h.autosave.trigger("u1", layout(1), SavePriority::Normal);
        h.autosave.flush().await;

        assert_eq!(h.executor.calls(), 1);
        assert_eq!(count(&h, EventKind::Retry), 0);
        assert_eq!(count(&h, EventKind::Error), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_request_supersedes_retries() {
        let h = harness();
        h.executor
            .failures
            .lock()
            .unwrap()
            .push_back(SaveError::Remote(RemoteError::Timeout));
        *h.executor.delay.lock().unwrap() = Duration::from_millis(500);

        h.autosave.trigger("u1", layout(1), SavePriority::High);
        sleep_ms(200).await;
        h.autosave.trigger("u1", layout(2), SavePriority::Normal);
        sleep_ms(3000).await;

        assert_eq!(h.executor.calls(), 2);
        assert_eq!(h.executor.last_layout().desktop.len(), 2);
        assert_eq!(count(&h, EventKind::Retry), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_save_is_queued_with_local_copy() {
        let h = harness();
        h.connectivity.set_online(false);

        h.autosave.trigger("u1", layout(2), SavePriority::Normal);
        let result = h.autosave.flush().await;

        assert_eq!(result, Some(AutoSaveResult::Queued));
        assert_eq!(h.executor.calls(), 0);
        assert_eq!(h.queue.len(), 1);
        assert!(h.local.get("dashboard_layout_u1").unwrap().is_some());
        assert!(count(&h, EventKind::Offline) >= 1);
        assert_eq!(count(&h, EventKind::Error), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_replays_queue() {
        let h = harness();
        h.connectivity.set_online(false);
        h.autosave.trigger("u1", layout(3), SavePriority::Normal);
        h.autosave.flush().await;
        assert_eq!(h.queue.len(), 1);

        h.connectivity.set_online(true);
        sleep_ms(1000).await;

        assert_eq!(count(&h, EventKind::Online), 1);
        assert!(h.queue.is_empty());
        assert_eq!(h.remote.get("u1").unwrap().desktop.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_during_reconnect_replay_leaves_queue_usable() {
        let h = harness();
        h.connectivity.set_online(false);
        h.autosave.trigger("u1", layout(2), SavePriority::Normal);
        h.autosave.flush().await;
        h.remote.set_delay(Duration::from_secs(1));

        h.connectivity.set_online(true);
        sleep_ms(700).await;
        h.autosave.dispose();
        sleep_ms(10).await;
        assert_eq!(h.queue.len(), 1);

        let report = h.queue.replay(&h.gateway, h.connectivity.as_ref()).await;

        assert_eq!(report.replayed, 1);
        assert!(h.queue.is_empty());
        assert_eq!(h.remote.get("u1").unwrap().desktop.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_pending_save() {
        let h = harness();
        h.autosave.trigger("u1", layout(1), SavePriority::Normal);
        assert!(h.autosave.has_pending_save());

        h.autosave.cancel_pending_save();
        sleep_ms(3000).await;

        assert!(!h.autosave.has_pending_save());
        assert_eq!(h.executor.calls(), 0);
        assert_eq!(h.autosave.flush().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_makes_instance_inert() {
        let h = harness();
        h.autosave.trigger("u1", layout(1), SavePriority::Normal);
        h.autosave.dispose();
        h.autosave.trigger("u1", layout(2), SavePriority::High);
        sleep_ms(3000).await;

        assert!(h.autosave.is_disposed());
        assert_eq!(h.executor.calls(), 0);

        // watcher detached
        h.connectivity.set_online(false);
        sleep_ms(10).await;
        assert_eq!(count(&h, EventKind::Offline), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_lets_in_flight_save_finish() {
        let h = harness();
        *h.executor.delay.lock().unwrap() = Duration::from_secs(1);
        h.autosave.trigger("u1", layout(1), SavePriority::High);
        sleep_ms(200).await;

        h.autosave.dispose();
        sleep_ms(2000).await;

        assert_eq!(h.executor.calls(), 1);
        assert!(matches!(h.autosave.last_result(), Some(AutoSaveResult::Saved(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_is_bounded() {
        let h = harness_with(AutoSaveConfig {
            history_cap: 2,
            ..AutoSaveConfig::default()
        });
        for n in 1..=3 {
            h.autosave.trigger("u1", layout(n), SavePriority::High);
            h.autosave.flush().await;
        }

        let history = h.autosave.history();
        assert_eq!(history.len(), 2);
        let expected = serde_json::to_string(&h.executor.last_layout()).unwrap();
        assert_eq!(history[1].key, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gateway_executor_reports_tier() {
        let remote = FakeRemote::new();
        let connectivity = Arc::new(ManualConnectivity::new(true));
        let gateway = Arc::new(StorageGateway::new(
            remote.clone(),
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryStore::new()),
            connectivity.clone(),
            Arc::new(PlainCodec),
            StorageConfig::default(),
        ));
        let queue = Arc::new(OfflineQueue::open(Arc::new(MemoryStore::new()), 10).unwrap());
        let autosave = AutoSave::with_gateway(gateway, queue, connectivity, AutoSaveConfig::default());

        autosave.trigger("u1", layout(1), SavePriority::High);
        let result = autosave.flush().await.unwrap();

        match result {
            AutoSaveResult::Saved(outcome) => assert!(outcome.reached_remote()),
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(remote.save_count(), 1);
    }
}
