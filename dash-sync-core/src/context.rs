//! Per-client bundle of shared engine components.

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::conflict::ConflictResolver;
use crate::connectivity::Connectivity;
use crate::optimistic::OptimisticUpdates;
use crate::queue::OfflineQueue;
use crate::remote::RemoteStore;
use crate::storage::{KeyValueStore, MemoryStore, PayloadCodec, PlainCodec, StorageError, StorageGateway};
use crate::validation::{LayoutValidator, WidgetRegistry};
use crate::version::VersionService;

/// One instance per running client, built once at start-up and shared by
/// reference with every component that needs it.
pub struct SyncContext {
    pub config: EngineConfig,
    pub device_id: String,
    pub connectivity: Arc<dyn Connectivity>,
    pub gateway: Arc<StorageGateway>,
    pub queue: Arc<OfflineQueue>,
    pub versions: Arc<VersionService>,
    pub validator: Arc<LayoutValidator>,
    pub conflicts: Arc<ConflictResolver>,
    pub optimistic: Arc<OptimisticUpdates>,
}

impl SyncContext {
    pub fn builder(
        remote: Arc<dyn RemoteStore>,
        local: Arc<dyn KeyValueStore>,
        connectivity: Arc<dyn Connectivity>,
    ) -> SyncContextBuilder {
        SyncContextBuilder {
            remote,
            local,
            connectivity,
            session: None,
            codec: None,
            config: EngineConfig::default(),
            device_id: None,
            registry: None,
        }
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }
}

pub struct SyncContextBuilder {
    remote: Arc<dyn RemoteStore>,
    local: Arc<dyn KeyValueStore>,
    connectivity: Arc<dyn Connectivity>,
    session: Option<Arc<dyn KeyValueStore>>,
    codec: Option<Arc<dyn PayloadCodec>>,
    config: EngineConfig,
    device_id: Option<String>,
    registry: Option<WidgetRegistry>,
}

impl SyncContextBuilder {
    /// Ephemeral tier; defaults to an in-process [`MemoryStore`].
    pub fn with_session(mut self, session: Arc<dyn KeyValueStore>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_codec(mut self, codec: Arc<dyn PayloadCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Defaults to a random id, which makes every run look like a new device.
    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    pub fn with_registry(mut self, registry: WidgetRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Opens the offline queue and version history in the durable local store.
    pub fn build(self) -> Result<SyncContext, StorageError> {
        let session = self
            .session
            .unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let codec = self.codec.unwrap_or_else(|| Arc::new(PlainCodec));

        let gateway = Arc::new(StorageGateway::new(
            self.remote,
            self.local.clone(),
            session,
            self.connectivity.clone(),
            codec,
            self.config.storage.clone(),
        ));
        let queue = Arc::new(OfflineQueue::open(self.local.clone(), self.config.queue.capacity)?);
        let versions = Arc::new(VersionService::new(self.local, self.config.versions.max_versions));
        let validator = Arc::new(LayoutValidator::new(
            self.registry.unwrap_or_else(WidgetRegistry::builtin),
        ));

        Ok(SyncContext {
            device_id: self
                .device_id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            connectivity: self.connectivity,
            gateway,
            queue,
            versions,
            validator,
            conflicts: Arc::new(ConflictResolver::new(self.config.conflict.clone())),
            optimistic: Arc::new(OptimisticUpdates::new(self.config.optimistic.expiry())),
            config: self.config,
        })
    }
}
