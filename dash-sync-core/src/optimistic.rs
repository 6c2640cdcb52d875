//! Bookkeeping and rollback for changes shown before they are confirmed.
//!
//! The caller applies a change to its own view first, then hands the
//! confirming operation to [`OptimisticUpdates::execute`]. If the operation
//! fails, the change's rollback runs along with every global rollback
//! subscriber.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::try_join_all;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStatus {
    Pending,
    Confirmed,
    Failed,
}

impl fmt::Display for UpdateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateStatus::Pending => write!(f, "pending"),
            UpdateStatus::Confirmed => write!(f, "confirmed"),
            UpdateStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateRecord {
    pub id: Uuid,
    pub description: String,
    pub status: UpdateStatus,
    pub error: Option<String>,
    settled_at: Option<Instant>,
}

/// A change already applied to the caller's view.
pub struct OptimisticChange {
    pub description: String,
    rollback: Option<Box<dyn FnOnce() + Send>>,
}

impl OptimisticChange {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            rollback: None,
        }
    }

    /// Undoes the change in the caller's view.
    pub fn with_rollback(mut self, rollback: impl FnOnce() + Send + 'static) -> Self {
        self.rollback = Some(Box::new(rollback));
        self
    }
}

pub struct UpdateCallbacks<T, E> {
    on_success: Option<Box<dyn FnOnce(&T) + Send>>,
    on_error: Option<Box<dyn FnOnce(&E) + Send>>,
    success_message: Option<String>,
    error_message: Option<String>,
}

impl<T, E> Default for UpdateCallbacks<T, E> {
    fn default() -> Self {
        Self {
            on_success: None,
            on_error: None,
            success_message: None,
            error_message: None,
        }
    }
}

impl<T, E> UpdateCallbacks<T, E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_on_success(mut self, f: impl FnOnce(&T) + Send + 'static) -> Self {
        self.on_success = Some(Box::new(f));
        self
    }

    pub fn with_on_error(mut self, f: impl FnOnce(&E) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    pub fn with_messages(mut self, success: impl Into<String>, error: impl Into<String>) -> Self {
        self.success_message = Some(success.into());
        self.error_message = Some(error.into());
        self
    }
}

type RollbackSubscriber = Arc<dyn Fn(&UpdateRecord) + Send + Sync>;

/// Tracks optimistic updates; settled records expire after a fixed delay.
pub struct OptimisticUpdates {
    expiry: Duration,
    records: Mutex<Vec<UpdateRecord>>,
    subscribers: Mutex<Vec<RollbackSubscriber>>,
}

impl OptimisticUpdates {
    pub fn new(expiry: Duration) -> Self {
        Self {
            expiry,
            records: Mutex::new(Vec::new()),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn on_rollback(&self, subscriber: impl Fn(&UpdateRecord) + Send + Sync + 'static) {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::new(subscriber));
    }

    pub async fn execute<T, E, F>(
        &self,
        operation: F,
        change: OptimisticChange,
        callbacks: UpdateCallbacks<T, E>,
    ) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let id = self.begin(&change.description);

        match operation.await {
            Ok(value) => {
                self.settle_success(&[id], &value, callbacks);
                Ok(value)
            }
            Err(error) => {
                self.settle_failure(vec![(id, change)], &error, callbacks);
                Err(error)
            }
        }
    }

    /// Awaits every operation together; any failure rolls back all changes.
    pub async fn execute_batch<T, E, F>(
        &self,
        operations: Vec<F>,
        changes: Vec<OptimisticChange>,
        callbacks: UpdateCallbacks<Vec<T>, E>,
    ) -> Result<Vec<T>, E>
    where
        F: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let ids: Vec<Uuid> = changes.iter().map(|c| self.begin(&c.description)).collect();

        match try_join_all(operations).await {
            Ok(values) => {
                self.settle_success(&ids, &values, callbacks);
                Ok(values)
            }
            Err(error) => {
                let batch = ids.into_iter().zip(changes).collect();
                self.settle_failure(batch, &error, callbacks);
                Err(error)
            }
        }
    }

    pub fn has_pending_updates(&self) -> bool {
        self.records()
            .iter()
            .any(|r| r.status == UpdateStatus::Pending)
    }

    pub fn pending_updates(&self) -> Vec<UpdateRecord> {
        self.with_status(UpdateStatus::Pending)
    }

    pub fn failed_updates(&self) -> Vec<UpdateRecord> {
        self.with_status(UpdateStatus::Failed)
    }

    pub fn clear(&self) {
        self.records().clear();
    }

    fn with_status(&self, status: UpdateStatus) -> Vec<UpdateRecord> {
        self.records()
            .iter()
            .filter(|r| r.status == status)
            .cloned()
            .collect()
    }

    /// Locks the records, dropping settled ones past their expiry.
    fn records(&self) -> MutexGuard<'_, Vec<UpdateRecord>> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        records.retain(|r| r.settled_at.map_or(true, |at| now < at + self.expiry));
        records
    }

    fn begin(&self, description: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.records().push(UpdateRecord {
            id,
            description: description.to_string(),
            status: UpdateStatus::Pending,
            error: None,
            settled_at: None,
        });
        id
    }

    fn mark(&self, id: Uuid, status: UpdateStatus, error: Option<String>) -> Option<UpdateRecord> {
        let mut records = self.records();
        let record = records.iter_mut().find(|r| r.id == id)?;
        record.status = status;
        record.error = error;
        record.settled_at = Some(Instant::now());
        Some(record.clone())
    }

    fn settle_success<T, E>(&self, ids: &[Uuid], value: &T, callbacks: UpdateCallbacks<T, E>) {
        if let Some(on_success) = callbacks.on_success {
            on_success(value);
        }
        if let Some(message) = callbacks.success_message {
            info!("{}", message);
        }
        for id in ids {
            self.mark(*id, UpdateStatus::Confirmed, None);
        }
    }

    fn settle_failure<T, E: fmt::Display>(
        &self,
        batch: Vec<(Uuid, OptimisticChange)>,
        error: &E,
        callbacks: UpdateCallbacks<T, E>,
    ) {
        let subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        // undo in reverse order of application
        for (id, change) in batch.into_iter().rev() {
            if let Some(rollback) = change.rollback {
                rollback();
            }
            if let Some(record) = self.mark(id, UpdateStatus::Failed, Some(error.to_string())) {
                for subscriber in &subscribers {
                    subscriber(&record);
                }
            }
        }

        if let Some(on_error) = callbacks.on_error {
            on_error(error);
        }
        match callbacks.error_message {
            Some(message) => warn!(error = %error, "{}", message),
            None => warn!(error = %error, "optimistic update rolled back"),
        }
    }
}

impl Default for OptimisticUpdates {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}
