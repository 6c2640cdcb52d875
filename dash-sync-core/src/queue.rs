//! Durable FIFO of save requests made while offline.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::connectivity::Connectivity;
use crate::models::OfflineQueueEntry;
use crate::storage::{KeyValueStore, StorageError, StorageGateway};

/// Fixed storage key for the queue, shared by every user on the device.
pub const QUEUE_KEY: &str = "dashboard_layout_offline_queue";

/// What a replay pass accomplished.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplayReport {
    pub replayed: usize,
    pub remaining: usize,
    /// Why the pass ended before draining the queue.
    pub stopped: Option<String>,
}

impl ReplayReport {
    pub fn is_complete(&self) -> bool {
        self.remaining == 0
    }
}

/// Clears the replay flag when a pass ends, including when its future is
/// dropped part way through.
struct ReplayGuard<'a>(&'a AtomicBool);

impl Drop for ReplayGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Bounded queue of pending saves, persisted after every mutation.
pub struct OfflineQueue {
    store: Arc<dyn KeyValueStore>,
    capacity: usize,
    entries: Mutex<VecDeque<OfflineQueueEntry>>,
    replaying: AtomicBool,
}

impl OfflineQueue {
    /// Opens the queue, restoring any entries persisted by an earlier run.
    ///
    /// Unreadable persisted data is discarded with a warning.
    pub fn open(store: Arc<dyn KeyValueStore>, capacity: usize) -> Result<Self, StorageError> {
        let mut entries: VecDeque<OfflineQueueEntry> = match store.get(QUEUE_KEY)? {
            Some(json) => serde_json::from_str(&json).unwrap_or_else(|e| {
                warn!(error = %e, "discarding unreadable offline queue");
                VecDeque::new()
            }),
            None => VecDeque::new(),
        };
        while entries.len() > capacity {
            entries.pop_front();
        }
        if !entries.is_empty() {
            debug!(count = entries.len(), "restored offline queue");
        }

        Ok(Self {
            store,
            capacity,
            entries: Mutex::new(entries),
            replaying: AtomicBool::new(false),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends an entry, returning the oldest entry if it had to be evicted.
    pub fn enqueue(&self, entry: OfflineQueueEntry) -> Option<OfflineQueueEntry> {
        let mut entries = self.lock();
        entries.push_back(entry);
        let evicted = if entries.len() > self.capacity {
            entries.pop_front()
        } else {
            None
        };
        if let Some(old) = &evicted {
            warn!(user_id = %old.request.user_id, "offline queue full, dropped oldest entry");
        }
        self.persist(&entries);
        evicted
    }

    /// Removes the entry whose request was created at `created_at`.
    pub fn dequeue(&self, created_at: DateTime<Utc>) -> bool {
        let mut entries = self.lock();
        let Some(index) = entries.iter().position(|e| e.created_at() == created_at) else {
            return false;
        };
        entries.remove(index);
        self.persist(&entries);
        true
    }

    /// Entries in arrival order.
    pub fn get_all(&self) -> Vec<OfflineQueueEntry> {
        self.lock().iter().cloned().collect()
    }

    pub fn clear(&self) {
        let mut entries = self.lock();
        entries.clear();
        self.persist(&entries);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Writes queued requests through the gateway in arrival order.
    ///
    /// An entry is removed only once the remote store accepted it. The pass
    /// stops at the first entry that does not reach the remote, or as soon as
    /// connectivity drops. Concurrent passes are skipped.
    pub async fn replay(&self, gateway: &StorageGateway, connectivity: &dyn Connectivity) -> ReplayReport {
        if self.replaying.swap(true, Ordering::SeqCst) {
            return ReplayReport {
                replayed: 0,
                remaining: self.len(),
                stopped: Some("replay already in progress".into()),
            };
        }
        let _guard = ReplayGuard(&self.replaying);

        let mut report = ReplayReport::default();
        loop {
            if !connectivity.is_online() {
                report.stopped = Some("connectivity lost".into());
                break;
            }
            let Some(entry) = self.lock().front().cloned() else {
                break;
            };

            let request = &entry.request;
            let outcome = gateway.save_with_retry(&request.user_id, &request.layout).await;
            if outcome.reached_remote() {
                self.dequeue(entry.created_at());
                report.replayed += 1;
            } else {
                let reason = outcome
                    .error
                    .unwrap_or_else(|| format!("layout stored in {} only", outcome.source));
                warn!(user_id = %request.user_id, reason = %reason, "offline replay stopped");
                report.stopped = Some(reason);
                break;
            }
        }

        report.remaining = self.len();
        if report.replayed > 0 {
            info!(replayed = report.replayed, remaining = report.remaining, "replayed offline queue");
        }
        report
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<OfflineQueueEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn persist(&self, entries: &VecDeque<OfflineQueueEntry>) {
        let result = serde_json::to_string(entries)
            .map_err(StorageError::from)
            .and_then(|json| self.store.set(QUEUE_KEY, &json));
        if let Err(e) = result {
            warn!(error = %e, "failed to persist offline queue");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::connectivity::ManualConnectivity;
    use crate::models::{Layout, SavePriority, SaveRequest, Widget, WidgetType};
    use crate::remote::testing::FakeRemote;
    use crate::remote::RemoteError;
    use crate::storage::{FileStore, MemoryStore, PlainCodec};
    use chrono::Duration;
    use tempfile::TempDir;

    fn entry(user: &str, n: i64) -> OfflineQueueEntry {
        let mut request = SaveRequest::new(
            user,
            Layout::new().with_desktop(vec![Widget::new(format!("w{}", n), WidgetType::Clock)]),
            SavePriority::Normal,
        );
        request.created_at = Utc::now() + Duration::milliseconds(n);
        OfflineQueueEntry::new(request)
    }

    fn memory_queue(capacity: usize) -> OfflineQueue {
        OfflineQueue::open(Arc::new(MemoryStore::new()), capacity).unwrap()
    }

    #[test]
    fn test_enqueue_and_dequeue_by_timestamp() {
        let queue = memory_queue(10);
        let first = entry("u1", 0);
        let second = entry("u1", 1);
        queue.enqueue(first.clone());
        queue.enqueue(second.clone());

        assert!(queue.dequeue(first.created_at()));
        assert!(!queue.dequeue(first.created_at()));
        assert_eq!(queue.get_all(), vec![second]);
    }

    #[test]
    fn test_overflow_evicts_oldest() {
        let queue = memory_queue(10);
        for n in 0..10 {
            assert!(queue.enqueue(entry("u1", n)).is_none());
        }

        let evicted = queue.enqueue(entry("u1", 10)).unwrap();

        assert_eq!(evicted.request.layout.desktop[0].id, "w0");
        assert_eq!(queue.len(), 10);
        assert_eq!(queue.get_all()[0].request.layout.desktop[0].id, "w1");
    }

    #[test]
    fn test_queue_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(temp_dir.path().to_path_buf()));

        let queue = OfflineQueue::open(store.clone(), 10).unwrap();
        queue.enqueue(entry("u1", 0));
        queue.enqueue(entry("u2", 1));
        drop(queue);

        let reopened = OfflineQueue::open(store.clone(), 10).unwrap();
        let users: Vec<String> = reopened.get_all().into_iter().map(|e| e.request.user_id).collect();
        assert_eq!(users, vec!["u1", "u2"]);

        reopened.clear();
        assert!(OfflineQueue::open(store, 10).unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_queue_starts_empty() {
        let store = Arc::new(MemoryStore::new());
        store.set(QUEUE_KEY, "not json").unwrap();
        assert!(OfflineQueue::open(store, 10).unwrap().is_empty());
    }

    fn gateway(remote: Arc<FakeRemote>, connectivity: Arc<ManualConnectivity>) -> StorageGateway {
        StorageGateway::new(
            remote,
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryStore::new()),
            connectivity,
            Arc::new(PlainCodec),
            StorageConfig::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_drains_in_order() {
        let remote = FakeRemote::new();
        let connectivity = Arc::new(ManualConnectivity::new(true));
        let gateway = gateway(remote.clone(), connectivity.clone());
        let queue = memory_queue(10);
        queue.enqueue(entry("u1", 0));
        queue.enqueue(entry("u2", 1));

        let report = queue.replay(&gateway, connectivity.as_ref()).await;

        assert_eq!(report.replayed, 2);
        assert!(report.is_complete());
        let order: Vec<String> = remote.saves.lock().unwrap().iter().map(|(u, _)| u.clone()).collect();
        assert_eq!(order, vec!["u1", "u2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_stops_on_failure_and_keeps_entry() {
        let remote = FakeRemote::new();
        let connectivity = Arc::new(ManualConnectivity::new(true));
        let gateway = gateway(remote.clone(), connectivity.clone());
        let queue = memory_queue(10);
        queue.enqueue(entry("u1", 0));
        queue.enqueue(entry("u1", 1));
        remote.fail_always(RemoteError::Rejected("forbidden".into()));

        let report = queue.replay(&gateway, connectivity.as_ref()).await;

        assert_eq!(report.replayed, 0);
        assert_eq!(report.remaining, 2);
        assert!(report.stopped.unwrap().contains("forbidden"));
        assert_eq!(remote.save_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_replay_is_skipped() {
        let remote = FakeRemote::new();
        remote.set_delay(std::time::Duration::from_secs(1));
        let connectivity = Arc::new(ManualConnectivity::new(true));
        let gateway = gateway(remote.clone(), connectivity.clone());
        let queue = memory_queue(10);
        queue.enqueue(entry("u1", 0));

        let (first, second) = tokio::join!(
            queue.replay(&gateway, connectivity.as_ref()),
            queue.replay(&gateway, connectivity.as_ref())
        );

        assert_eq!(first.replayed, 1);
        assert_eq!(second.stopped.as_deref(), Some("replay already in progress"));
        assert_eq!(remote.save_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_replay_does_not_block_later_passes() {
        let remote = FakeRemote::new();
        remote.set_delay(std::time::Duration::from_secs(1));
        let connectivity = Arc::new(ManualConnectivity::new(true));
        let gateway = gateway(remote.clone(), connectivity.clone());
        let queue = memory_queue(10);
        queue.enqueue(entry("u1", 0));

        let cancelled = tokio::time::timeout(
            std::time::Duration::from_millis(700),
            queue.replay(&gateway, connectivity.as_ref()),
        )
        .await;
        assert!(cancelled.is_err());
        assert_eq!(queue.len(), 1);

        let report = queue.replay(&gateway, connectivity.as_ref()).await;

        assert_eq!(report.stopped, None);
        assert_eq!(report.replayed, 1);
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_offline_does_nothing() {
        let remote = FakeRemote::new();
        let connectivity = Arc::new(ManualConnectivity::new(false));
        let gateway = gateway(remote.clone(), connectivity.clone());
        let queue = memory_queue(10);
        queue.enqueue(entry("u1", 0));

        let report = queue.replay(&gateway, connectivity.as_ref()).await;

        assert_eq!(report.stopped.as_deref(), Some("connectivity lost"));
        assert_eq!(report.remaining, 1);
        assert_eq!(remote.save_count(), 0);
    }
}
