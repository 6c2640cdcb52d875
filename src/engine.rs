//! Builds the sync engine for one CLI invocation.

use std::sync::Arc;

use dash_sync_core::{
    FileStore, KeyValueStore, ManualConnectivity, PersistenceManager, RemoteStore, StorageError,
    SyncContext,
};

use crate::config::Config;
use crate::remote::{HttpRemote, NoRemote};

/// Key under which a generated device id is remembered.
const DEVICE_ID_KEY: &str = "device_id";

pub struct Engine {
    pub manager: PersistenceManager,
    pub user_id: String,
    pub server_url: Option<String>,
}

impl Engine {
    /// Wires the file-backed local store and, when configured and reachable,
    /// the HTTP remote. Without a reachable server the engine runs offline.
    pub async fn open(config: &Config) -> Result<Self, Box<dyn std::error::Error>> {
        let data_dir = config.data_dir.value.clone();
        std::fs::create_dir_all(&data_dir)
            .map_err(|e| StorageError::IoError(data_dir.clone(), e))?;
        let local: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(data_dir));

        let (remote, online): (Arc<dyn RemoteStore>, bool) = match &config.server_url.value {
            Some(url) => {
                let http = HttpRemote::new(url);
                let online = http.probe().await;
                if !online {
                    tracing::warn!(server = %http.base_url(), "server unreachable, working offline");
                }
                (Arc::new(http), online)
            }
            None => (Arc::new(NoRemote), false),
        };

        let device_id = match &config.device_id.value {
            Some(id) => id.clone(),
            None => remembered_device_id(local.as_ref())?,
        };

        let ctx = SyncContext::builder(remote, local, Arc::new(ManualConnectivity::new(online)))
            .with_config(config.engine.clone())
            .with_device_id(device_id)
            .build()?;

        Ok(Self {
            manager: PersistenceManager::new(Arc::new(ctx)),
            user_id: config.user_id.value.clone(),
            server_url: config.server_url.value.clone(),
        })
    }

    pub fn context(&self) -> &Arc<SyncContext> {
        self.manager.context()
    }

    /// Waits for scheduled saves and stops the auto-save machinery.
    pub async fn close(&self) {
        self.manager.flush().await;
        self.manager.dispose();
    }
}

/// Returns the stored device id, generating and storing one on first use.
fn remembered_device_id(store: &dyn KeyValueStore) -> Result<String, StorageError> {
    if let Some(id) = store.get(DEVICE_ID_KEY)? {
        let id = id.trim().trim_matches('"').to_string();
        if !id.is_empty() {
            return Ok(id);
        }
    }
    let id = uuid::Uuid::new_v4().to_string();
    store.set(DEVICE_ID_KEY, &serde_json::to_string(&id)?)?;
    Ok(id)
}
