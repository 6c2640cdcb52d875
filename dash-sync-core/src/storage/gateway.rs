//! Tiered persistence: remote first, then durable local, then session.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use futures::future::{FutureExt, Shared};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use super::kv::{KeyValueStore, PayloadCodec, StorageError};
use crate::config::StorageConfig;
use crate::connectivity::Connectivity;
use crate::models::Layout;
use crate::remote::{RemoteError, RemoteStore};

/// Which tier ended up holding (or serving) a layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageSource {
    Database,
    Local,
    Cache,
}

impl fmt::Display for StorageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageSource::Database => write!(f, "database"),
            StorageSource::Local => write!(f, "local"),
            StorageSource::Cache => write!(f, "cache"),
        }
    }
}

/// Result of a tiered save. `success` with a non-database source means the
/// layout is only stored on this device.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveOutcome {
    pub success: bool,
    pub source: StorageSource,
    pub error: Option<String>,
}

impl SaveOutcome {
    fn stored(source: StorageSource, error: Option<String>) -> Self {
        Self {
            success: true,
            source,
            error,
        }
    }

    fn failed(error: String) -> Self {
        Self {
            success: false,
            source: StorageSource::Cache,
            error: Some(error),
        }
    }

    /// True if the remote store accepted the layout.
    pub fn reached_remote(&self) -> bool {
        self.success && self.source == StorageSource::Database
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadOutcome {
    pub layout: Layout,
    pub source: StorageSource,
}

type SharedOutcome = Shared<oneshot::Receiver<SaveOutcome>>;

/// A write waiting out the debounce window; later callers replace `layout`
/// and await `outcome`.
struct PendingWrite {
    layout: Layout,
    outcome: SharedOutcome,
}

/// Persists layouts across the remote, durable local and session tiers.
pub struct StorageGateway {
    remote: Arc<dyn RemoteStore>,
    local: Arc<dyn KeyValueStore>,
    session: Arc<dyn KeyValueStore>,
    connectivity: Arc<dyn Connectivity>,
    codec: Arc<dyn PayloadCodec>,
    config: StorageConfig,
    user_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    pending: Mutex<HashMap<String, PendingWrite>>,
}

/// Removes an abandoned pending write if its driving caller is dropped
/// before the write starts.
struct PendingGuard<'a> {
    pending: &'a Mutex<HashMap<String, PendingWrite>>,
    user_id: &'a str,
    armed: bool,
}

impl PendingGuard<'_> {
    fn take_layout(&mut self) -> Option<Layout> {
        self.armed = false;
        lock(self.pending).remove(self.user_id).map(|p| p.layout)
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            lock(self.pending).remove(self.user_id);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl StorageGateway {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        local: Arc<dyn KeyValueStore>,
        session: Arc<dyn KeyValueStore>,
        connectivity: Arc<dyn Connectivity>,
        codec: Arc<dyn PayloadCodec>,
        config: StorageConfig,
    ) -> Self {
        Self {
            remote,
            local,
            session,
            connectivity,
            codec,
            config,
            user_locks: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    /// Saves a layout, falling back tier by tier.
    ///
    /// Calls for the same user within the debounce window are coalesced into
    /// a single write of the newest layout, and writes for one user never
    /// overlap.
    pub async fn save_with_retry(&self, user_id: &str, layout: &Layout) -> SaveOutcome {
        let (sender, outcome) = {
            let mut pending = lock(&self.pending);
            match pending.get_mut(user_id) {
                Some(entry) => {
                    entry.layout = layout.clone();
                    (None, entry.outcome.clone())
                }
                None => {
                    let (tx, rx) = oneshot::channel();
                    let shared = rx.shared();
                    pending.insert(
                        user_id.to_string(),
                        PendingWrite {
                            layout: layout.clone(),
                            outcome: shared.clone(),
                        },
                    );
                    (Some(tx), shared)
                }
            }
        };

        let Some(sender) = sender else {
            debug!(user_id, "coalescing save into pending write");
            return outcome
                .await
                .unwrap_or_else(|_| SaveOutcome::failed("pending write was abandoned".into()));
        };

        let mut guard = PendingGuard {
            pending: &self.pending,
            user_id,
            armed: true,
        };
        let debounce = self.config.debounce();
        if !debounce.is_zero() {
            tokio::time::sleep(debounce).await;
        }
        let latest = guard.take_layout().unwrap_or_else(|| layout.clone());

        let user_lock = self.user_lock(user_id);
        let result = {
            let _serialized = user_lock.lock().await;
            self.write_tiers(user_id, &latest).await
        };

        // Joined callers may have gone away; nothing to do then.
        let _ = sender.send(result.clone());
        result
    }

    /// Loads a layout: remote (when online), then durable local, then session.
    pub async fn load(&self, user_id: &str) -> Option<LoadOutcome> {
        if self.connectivity.is_online() {
            match self.remote.load(user_id).await {
                Ok(Some(layout)) => {
                    if let Err(e) = self.write_tier(self.local.as_ref(), user_id, &layout) {
                        warn!(user_id, error = %e, "failed to mirror remote layout locally");
                    }
                    return Some(LoadOutcome {
                        layout,
                        source: StorageSource::Database,
                    });
                }
                Ok(None) => debug!(user_id, "no remote layout"),
                Err(e) => warn!(user_id, error = %e, "remote load failed, using local tiers"),
            }
        }

        self.load_local(user_id)
    }

    /// Reads the remote record without any fallback.
    pub async fn load_remote(&self, user_id: &str) -> Result<Option<Layout>, RemoteError> {
        self.remote.load(user_id).await
    }

    /// Reads the durable local tier, then the session tier.
    pub fn load_local(&self, user_id: &str) -> Option<LoadOutcome> {
        if let Some(layout) = self.read_tier(self.local.as_ref(), "local", user_id) {
            return Some(LoadOutcome {
                layout,
                source: StorageSource::Local,
            });
        }
        self.read_tier(self.session.as_ref(), "session", user_id)
            .map(|layout| LoadOutcome {
                layout,
                source: StorageSource::Cache,
            })
    }

    /// Writes to the durable local tier, falling back to the session tier.
    pub fn store_local(&self, user_id: &str, layout: &Layout) -> Result<StorageSource, StorageError> {
        match self.write_tier(self.local.as_ref(), user_id, layout) {
            Ok(()) => Ok(StorageSource::Local),
            Err(e) => {
                warn!(user_id, error = %e, "local storage failed, using session storage");
                self.write_tier(self.session.as_ref(), user_id, layout)?;
                Ok(StorageSource::Cache)
            }
        }
    }

    async fn write_tiers(&self, user_id: &str, layout: &Layout) -> SaveOutcome {
        if !self.connectivity.is_online() {
            debug!(user_id, "offline, writing layout to local storage");
            return self.write_fallback(user_id, layout, None);
        }

        let max_retries = self.config.max_retries;
        let mut last_error = None;

        for attempt in 0..=max_retries {
            match self.remote.save(user_id, layout).await {
                Ok(()) => {
                    if let Err(e) = self.write_tier(self.local.as_ref(), user_id, layout) {
                        warn!(user_id, error = %e, "failed to mirror saved layout locally");
                    }
                    info!(user_id, version = layout.version, attempt, "layout saved to remote");
                    return SaveOutcome::stored(StorageSource::Database, None);
                }
                Err(e) => {
                    let retryable = e.is_retryable();
                    warn!(user_id, attempt, retryable, error = %e, "remote save failed");
                    last_error = Some(e);
                    if !retryable || attempt == max_retries {
                        break;
                    }
                    tokio::time::sleep(self.config.retry_delay() * (attempt + 1)).await;
                }
            }
        }

        self.write_fallback(user_id, layout, last_error.map(|e| e.to_string()))
    }

    fn write_fallback(&self, user_id: &str, layout: &Layout, remote_error: Option<String>) -> SaveOutcome {
        let local_error = match self.write_tier(self.local.as_ref(), user_id, layout) {
            Ok(()) => return SaveOutcome::stored(StorageSource::Local, remote_error),
            Err(e) => e,
        };
        warn!(user_id, error = %local_error, "local storage failed, using session storage");

        match self.write_tier(self.session.as_ref(), user_id, layout) {
            Ok(()) => SaveOutcome::stored(
                StorageSource::Cache,
                Some(remote_error.unwrap_or_else(|| local_error.to_string())),
            ),
            Err(session_error) => {
                error!(user_id, error = %session_error, "all storage tiers failed");
                let mut message = format!("local: {}; session: {}", local_error, session_error);
                if let Some(remote) = remote_error {
                    message = format!("remote: {}; {}", remote, message);
                }
                SaveOutcome::failed(message)
            }
        }
    }

    fn write_tier(&self, store: &dyn KeyValueStore, user_id: &str, layout: &Layout) -> Result<(), StorageError> {
        let json = serde_json::to_string(layout)?;
        let payload = self.codec.encode(&json)?;
        store.set(&self.config.key_for(user_id), &payload)
    }

    fn read_tier(&self, store: &dyn KeyValueStore, tier: &str, user_id: &str) -> Option<Layout> {
        let key = self.config.key_for(user_id);
        let decoded = store
            .get(&key)
            .and_then(|stored| stored.map(|s| self.codec.decode(&s)).transpose());

        match decoded {
            Ok(Some(json)) => match serde_json::from_str(&json) {
                Ok(layout) => Some(layout),
                Err(e) => {
                    warn!(user_id, tier, error = %e, "discarding unreadable stored layout");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(user_id, tier, error = %e, "failed to read stored layout");
                None
            }
        }
    }

    fn user_lock(&self, user_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        lock(&self.user_locks)
            .entry(user_id.to_string())
            .or_default()
            .clone()
    }
}
