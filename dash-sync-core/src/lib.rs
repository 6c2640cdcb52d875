//! Dashsync Core Library
//!
//! Persistence and cross-device sync for user dashboard layouts: validation,
//! tiered storage with offline queueing, debounced auto-save, version history
//! and conflict resolution.

pub mod autosave;
pub mod config;
pub mod conflict;
pub mod connectivity;
pub mod context;
pub mod error;
pub mod manager;
pub mod models;
pub mod optimistic;
pub mod queue;
pub mod remote;
pub mod storage;
pub mod validation;
pub mod version;

pub use autosave::{AutoSave, AutoSaveEvent, AutoSaveResult, EventKind, SaveExecutor};
pub use config::EngineConfig;
pub use conflict::{ConflictResolver, Resolution, Strategy};
pub use connectivity::{Connectivity, ManualConnectivity};
pub use context::{SyncContext, SyncContextBuilder};
pub use error::SaveError;
pub use manager::{
    ManagerError, PersistenceManager, SaveOptions, SaveReport, SaveStatus, SyncAction, SyncReport,
};
pub use models::{
    Breakpoint, ChangeType, ConflictMetadata, Layout, LayoutVersion, OfflineQueueEntry, SavePriority,
    SaveRequest, Widget, WidgetSize, WidgetType, GRID_COLUMNS,
};
pub use optimistic::{OptimisticChange, OptimisticUpdates, UpdateCallbacks, UpdateRecord, UpdateStatus};
pub use queue::{OfflineQueue, ReplayReport};
pub use remote::{RemoteError, RemoteStore};
pub use storage::{
    FileStore, KeyValueStore, LoadOutcome, MemoryStore, PayloadCodec, PlainCodec, SaveOutcome,
    StorageError, StorageGateway, StorageSource,
};
pub use validation::{LayoutValidator, ValidationReport, WidgetRegistry};
pub use version::{compare_versions, generate_checksum, Change, ChangeKind, VersionError, VersionService};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
