//! Facade tying validation, conflict handling, auto-save and version history
//! together for the UI layer.
//!
//! Expected conditions (validation failures, offline, degraded storage) come
//! back as [`SaveReport`] and [`SyncReport`] values rather than errors.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::autosave::{AutoSave, AutoSaveEvent, AutoSaveResult, EventKind, SaveExecutor};
use crate::conflict::{Resolution, Strategy};
use crate::context::SyncContext;
use crate::error::SaveError;
use crate::models::{
    Breakpoint, ChangeType, ConflictMetadata, Layout, LayoutVersion, SavePriority, SaveRequest, Widget,
};
use crate::queue::ReplayReport;
use crate::storage::{LoadOutcome, SaveOutcome, StorageSource};
use crate::validation::{ValidationReport, ValidationWarning};
use crate::version::{compare_versions, generate_checksum, generate_description, VersionError};

#[derive(Error, Debug)]
pub enum ManagerError {
    #[error(transparent)]
    Version(#[from] VersionError),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SaveOptions {
    /// Save right away instead of waiting out the debounce.
    pub immediate: bool,
    pub description: Option<String>,
    pub change_type: ChangeType,
}

impl SaveOptions {
    pub fn immediate() -> Self {
        Self {
            immediate: true,
            ..Self::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_change_type(mut self, change_type: ChangeType) -> Self {
        self.change_type = change_type;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SaveStatus {
    /// Accepted by the remote store.
    Saved { version: u64 },
    /// Held on this device only; `source` is the tier that took it.
    SavedLocally { source: StorageSource, error: Option<String> },
    /// Offline; waiting in the offline queue.
    Queued,
    /// Handed to the debounced auto-save.
    Scheduled,
    Rejected(ValidationReport),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SaveReport {
    pub status: SaveStatus,
    /// The layout as it was sent to storage (sanitized, merged, stamped).
    pub layout: Layout,
    pub conflict: Option<Resolution>,
    pub warnings: Vec<ValidationWarning>,
}

impl SaveReport {
    pub fn is_rejected(&self) -> bool {
        matches!(self.status, SaveStatus::Rejected(_))
    }

    /// User-facing status line.
    pub fn notice(&self) -> String {
        let mut notice = match &self.status {
            SaveStatus::Saved { version } => format!("Layout saved (version {})", version),
            SaveStatus::SavedLocally { .. } => {
                "Layout saved locally, will sync when the server is reachable".to_string()
            }
            SaveStatus::Queued => "Offline: layout queued and will sync when back online".to_string(),
            SaveStatus::Scheduled => "Layout changes will be saved shortly".to_string(),
            SaveStatus::Rejected(report) => format!("Layout rejected: {}", report.summary()),
            SaveStatus::Failed(message) => format!("Layout could not be saved: {}", message),
        };

        if let Some(resolution) = &self.conflict {
            match resolution.strategy {
                Strategy::Merge => notice.push_str(" (merged with changes from another device)"),
                Strategy::Remote => notice.push_str(" (newer changes from another device were kept)"),
                Strategy::Local => notice.push_str(" (kept this device's changes over another device's)"),
            }
        }
        notice
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncAction {
    /// The local copy was newer and has been saved remotely.
    Pushed(SaveStatus),
    /// The remote copy was newer and replaced the local copy.
    Pulled { version: u64 },
    InSync,
    Nothing,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    pub online: bool,
    pub replay: Option<ReplayReport>,
    pub action: SyncAction,
}

/// State shared between the manager and the save executor it installs.
struct Shared {
    ctx: Arc<SyncContext>,
    last_known: Mutex<HashMap<String, Layout>>,
}

impl Shared {
    fn last_known(&self) -> MutexGuard<'_, HashMap<String, Layout>> {
        self.last_known.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Writes through the gateway and, when the remote accepted the layout,
/// records a version and refreshes the last-known snapshot.
struct RecordingExecutor {
    shared: Arc<Shared>,
}

#[async_trait]
impl SaveExecutor for RecordingExecutor {
    async fn execute(&self, request: &SaveRequest) -> Result<SaveOutcome, SaveError> {
        let ctx = &self.shared.ctx;
        let outcome = ctx
            .gateway
            .save_with_retry(&request.user_id, &request.layout)
            .await;
        if !outcome.success {
            return Err(SaveError::Storage(outcome.error.unwrap_or_default()));
        }
        if !outcome.reached_remote() {
            return Ok(outcome);
        }

        let previous = self.shared.last_known().get(&request.user_id).cloned();
        let description = request.description.clone().unwrap_or_else(|| match &previous {
            Some(previous) => generate_description(&compare_versions(previous, &request.layout)),
            None => "Initial layout".to_string(),
        });
        if let Err(e) = ctx.versions.create_version(
            &request.user_id,
            &request.layout,
            description,
            Some(&ctx.device_id),
            request.change_type,
        ) {
            warn!(user_id = %request.user_id, error = %e, "failed to record layout version");
        }

        self.shared
            .last_known()
            .insert(request.user_id.clone(), request.layout.clone());
        Ok(outcome)
    }
}

/// Entry point for the UI layer.
pub struct PersistenceManager {
    shared: Arc<Shared>,
    autosave: AutoSave,
}

impl PersistenceManager {
    /// Must be called inside a tokio runtime.
    pub fn new(ctx: Arc<SyncContext>) -> Self {
        let shared = Arc::new(Shared {
            ctx: ctx.clone(),
            last_known: Mutex::new(HashMap::new()),
        });
        let executor = Arc::new(RecordingExecutor {
            shared: shared.clone(),
        });
        let autosave = AutoSave::new(
            executor,
            ctx.gateway.clone(),
            ctx.queue.clone(),
            ctx.connectivity.clone(),
            ctx.config.autosave.clone(),
        );
        Self { shared, autosave }
    }

    pub fn context(&self) -> &Arc<SyncContext> {
        &self.shared.ctx
    }

    pub fn validate_layout(&self, layout: &Layout) -> ValidationReport {
        let validator = &self.shared.ctx.validator;
        let mut report = validator.validate_widgets(&layout.desktop);
        let mobile = validator.validate_widgets(&layout.mobile);
        report.valid &= mobile.valid;
        report.errors.extend(mobile.errors);
        report.warnings.extend(mobile.warnings);
        report
    }

    pub fn sanitize_layout(&self, mut layout: Layout) -> Layout {
        let validator = &self.shared.ctx.validator;
        layout.desktop = validator.sanitize_widgets(&layout.desktop);
        layout.mobile = validator.sanitize_widgets(&layout.mobile);
        layout
    }

    pub fn last_known_layout(&self, user_id: &str) -> Option<Layout> {
        self.shared.last_known().get(user_id).cloned()
    }

    /// Validates, reconciles and saves a layout.
    ///
    /// The returned report carries the layout exactly as it was handed to
    /// storage; callers should adopt it as their current layout.
    pub async fn save_layout(&self, user_id: &str, layout: Layout, options: SaveOptions) -> SaveReport {
        let ctx = &self.shared.ctx;

        let validation = self.validate_layout(&layout);
        if !validation.valid {
            warn!(user_id, issues = %validation.summary(), "rejected invalid layout");
            return SaveReport {
                warnings: validation.warnings.clone(),
                status: SaveStatus::Rejected(validation),
                layout,
                conflict: None,
            };
        }
        let mut layout = self.sanitize_layout(layout);
        let mut change_type = options.change_type;

        let base = self.last_known_layout(user_id);
        let remote = self.remote_snapshot(user_id, base.as_ref()).await;

        let now = Utc::now();
        stamp_changed_widgets(&mut layout, base.as_ref().or(remote.as_ref()), now);

        let mut conflict = None;
        if let Some(remote) = &remote {
            if ctx.config.conflict.enabled {
                if let Some(resolution) = self.reconcile(&mut layout, remote, base.as_ref()) {
                    change_type = ChangeType::ConflictResolution;
                    conflict = Some(resolution);
                }
            }
        }

        layout.version = self.next_version(user_id, &layout, remote.as_ref());
        layout.device_id = Some(ctx.device_id.clone());
        layout.updated_at = now;
        layout.checksum = Some(generate_checksum(&layout));

        let mut request = SaveRequest::new(
            user_id,
            layout.clone(),
            if options.immediate {
                SavePriority::High
            } else {
                SavePriority::Normal
            },
        )
        .with_change_type(change_type);
        request.description = options.description;

        self.autosave.trigger_request(request);
        let status = if options.immediate {
            match self.autosave.flush().await {
                Some(_) => match self.autosave.last_result_for(user_id) {
                    Some(result) => self.status_for(user_id, &layout, result),
                    None => SaveStatus::Failed("save finished without a result".into()),
                },
                None => SaveStatus::Failed("auto-save is no longer running".into()),
            }
        } else {
            SaveStatus::Scheduled
        };

        SaveReport {
            status,
            layout,
            conflict,
            warnings: validation.warnings,
        }
    }

    /// Loads through the storage tiers, sanitizes the result and caches it as
    /// the last-known snapshot.
    pub async fn load_layout(&self, user_id: &str) -> Option<LoadOutcome> {
        let mut outcome = self.shared.ctx.gateway.load(user_id).await?;
        outcome.layout = self.sanitize_layout(outcome.layout);
        self.shared
            .last_known()
            .insert(user_id.to_string(), outcome.layout.clone());
        debug!(user_id, source = %outcome.source, "layout loaded");
        Some(outcome)
    }

    /// Saves the widgets recorded at `version` as a new, validated save.
    pub async fn rollback_to_version(&self, user_id: &str, version: u64) -> Result<SaveReport, ManagerError> {
        let restored = self.shared.ctx.versions.rollback_to_version(user_id, version)?;
        info!(user_id, version, "rolling back layout");

        let options = SaveOptions::immediate()
            .with_description(format!("Rolled back to version {}", version))
            .with_change_type(ChangeType::Manual);
        Ok(self.save_layout(user_id, restored, options).await)
    }

    pub fn get_version_history(
        &self,
        user_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<LayoutVersion>, ManagerError> {
        Ok(self.shared.ctx.versions.get_version_history(user_id, limit)?)
    }

    /// Replays the offline queue, then reconciles the durable local copy with
    /// the remote one.
    pub async fn sync(&self, user_id: &str) -> SyncReport {
        let ctx = &self.shared.ctx;
        if !ctx.is_online() {
            return SyncReport {
                online: false,
                replay: None,
                action: SyncAction::Nothing,
            };
        }

        let replay = ctx.queue.replay(&ctx.gateway, ctx.connectivity.as_ref()).await;

        let local = ctx.gateway.load_local(user_id).map(|o| o.layout);
        let remote = match ctx.gateway.load_remote(user_id).await {
            Ok(remote) => remote,
            Err(e) => {
                warn!(user_id, error = %e, "sync could not read remote layout");
                return SyncReport {
                    online: true,
                    replay: Some(replay),
                    action: SyncAction::Failed(e.to_string()),
                };
            }
        };

        let action = match (local, remote) {
            (None, None) => SyncAction::Nothing,
            (Some(local), None) => self.push(user_id, local).await,
            (local, Some(remote)) => {
                let remote = self.sanitize_layout(remote);
                match local {
                    Some(local) if generate_checksum(&local) == generate_checksum(&remote) => {
                        self.remember(user_id, &remote);
                        SyncAction::InSync
                    }
                    Some(local) if local.updated_at > remote.updated_at => self.push(user_id, local).await,
                    _ => self.pull(user_id, remote),
                }
            }
        };

        info!(user_id, replayed = replay.replayed, action = ?action, "sync finished");
        SyncReport {
            online: true,
            replay: Some(replay),
            action,
        }
    }

    pub async fn flush(&self) -> Option<AutoSaveResult> {
        self.autosave.flush().await
    }

    pub fn has_pending_save(&self) -> bool {
        self.autosave.has_pending_save()
    }

    pub fn cancel_pending_save(&self) {
        self.autosave.cancel_pending_save();
    }

    pub fn on(&self, kind: EventKind, handler: impl Fn(&AutoSaveEvent) + Send + Sync + 'static) {
        self.autosave.on(kind, handler);
    }

    pub fn dispose(&self) {
        self.autosave.dispose();
    }

    async fn push(&self, user_id: &str, local: Layout) -> SyncAction {
        let options = SaveOptions::immediate().with_description("Synced local changes");
        let report = self.save_layout(user_id, local, options).await;
        match report.status {
            SaveStatus::Rejected(validation) => SyncAction::Failed(validation.summary()),
            status => SyncAction::Pushed(status),
        }
    }

    fn pull(&self, user_id: &str, remote: Layout) -> SyncAction {
        if let Err(e) = self.shared.ctx.gateway.store_local(user_id, &remote) {
            warn!(user_id, error = %e, "failed to store pulled layout locally");
        }
        self.remember(user_id, &remote);
        SyncAction::Pulled {
            version: remote.version,
        }
    }

    fn remember(&self, user_id: &str, layout: &Layout) {
        self.shared
            .last_known()
            .insert(user_id.to_string(), layout.clone());
    }

    /// Fresh remote read when online, cached snapshot otherwise.
    async fn remote_snapshot(&self, user_id: &str, cached: Option<&Layout>) -> Option<Layout> {
        let ctx = &self.shared.ctx;
        if !ctx.is_online() {
            return cached.cloned();
        }
        match ctx.gateway.load_remote(user_id).await {
            Ok(remote) => remote.map(|r| self.sanitize_layout(r)),
            Err(e) => {
                warn!(user_id, error = %e, "remote read failed, using cached snapshot");
                cached.cloned()
            }
        }
    }

    /// Resolves a conflict with `remote` in place. The local side is described
    /// by the snapshot it was derived from (`base`), not by the edit time.
    fn reconcile(&self, layout: &mut Layout, remote: &Layout, base: Option<&Layout>) -> Option<Resolution> {
        let ctx = &self.shared.ctx;
        let base_modified = base.map(|b| b.updated_at).unwrap_or(layout.updated_at);
        let local_meta = ConflictMetadata::new(layout.version, base_modified, ctx.device_id.clone());
        let remote_meta = ConflictMetadata::from_layout(remote);

        if !ctx
            .conflicts
            .detect_conflict(layout, remote, Some(&local_meta), remote_meta.as_ref())
        {
            return None;
        }

        let resolution = ctx
            .conflicts
            .suggest_resolution(layout, remote, Some(&local_meta), remote_meta.as_ref());
        info!(
            strategy = %resolution.strategy,
            reason = %resolution.reason,
            remote_version = remote.version,
            "resolving layout conflict"
        );
        *layout = ctx.conflicts.resolve_conflict(layout, remote, resolution.strategy);
        Some(resolution)
    }

    fn next_version(&self, user_id: &str, layout: &Layout, remote: Option<&Layout>) -> u64 {
        let recorded = match self.shared.ctx.versions.latest_version(user_id) {
            Ok(latest) => latest.map(|v| v.version).unwrap_or(0),
            Err(e) => {
                warn!(user_id, error = %e, "could not read version history");
                0
            }
        };
        let cached = self.last_known_layout(user_id).map(|l| l.version).unwrap_or(0);
        let remote = remote.map(|l| l.version).unwrap_or(0);

        recorded.max(cached).max(remote).max(layout.version).saturating_add(1)
    }

    fn status_for(&self, user_id: &str, layout: &Layout, result: AutoSaveResult) -> SaveStatus {
        match result {
            AutoSaveResult::Saved(outcome) if outcome.reached_remote() => SaveStatus::Saved {
                version: layout.version,
            },
            AutoSaveResult::Saved(outcome) => SaveStatus::SavedLocally {
                source: outcome.source,
                error: outcome.error,
            },
            AutoSaveResult::Queued => SaveStatus::Queued,
            AutoSaveResult::Failed(e) => {
                error!(user_id, error = %e, "layout save failed");
                if let Err(local) = self.shared.ctx.gateway.store_local(user_id, layout) {
                    error!(user_id, error = %local, "best-effort local save failed");
                }
                SaveStatus::Failed(e.to_string())
            }
        }
    }
}

/// Sets `updatedAt` on widgets that are new or changed relative to `previous`.
fn stamp_changed_widgets(layout: &mut Layout, previous: Option<&Layout>, now: chrono::DateTime<Utc>) {
    for breakpoint in Breakpoint::ALL {
        for widget in layout.widgets_mut(breakpoint).iter_mut() {
            let prior: Option<&Widget> = previous.and_then(|p| p.find(breakpoint, &widget.id));
            let changed = prior.map_or(true, |prior| widget.differs_from(prior));
            if changed {
                widget.updated_at = Some(now);
            } else if widget.updated_at.is_none() {
                widget.updated_at = prior.and_then(|p| p.updated_at);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::connectivity::ManualConnectivity;
    use crate::models::WidgetType;
    use crate::remote::testing::FakeRemote;
    use crate::remote::RemoteError;
    use crate::storage::{KeyValueStore, MemoryStore};
    use chrono::Duration;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Harness {
        manager: PersistenceManager,
        remote: Arc<FakeRemote>,
        local: Arc<MemoryStore>,
        connectivity: Arc<ManualConnectivity>,
    }

    fn harness() -> Harness {
        let remote = FakeRemote::new();
        let local = Arc::new(MemoryStore::new());
        let connectivity = Arc::new(ManualConnectivity::new(true));
        let ctx = SyncContext::builder(remote.clone(), local.clone(), connectivity.clone())
            .with_device_id("d1")
            .with_config(EngineConfig::default())
            .build()
            .unwrap();
        Harness {
            manager: PersistenceManager::new(Arc::new(ctx)),
            remote,
            local,
            connectivity,
        }
    }

    fn layout() -> Layout {
        Layout::new().with_desktop(vec![
            Widget::new("chart", WidgetType::Chart).with_dimensions(6, 4),
            Widget::new("notes", WidgetType::Notes).at(6, 0),
        ])
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_save_records_version() {
        let h = harness();
        let report = h
            .manager
            .save_layout("u1", layout(), SaveOptions::immediate())
            .await;

        assert_eq!(report.status, SaveStatus::Saved { version: 1 });
        assert_eq!(report.notice(), "Layout saved (version 1)");
        let stored = h.remote.get("u1").unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.device_id.as_deref(), Some("d1"));
        assert_eq!(stored.checksum, Some(generate_checksum(&stored)));
        assert!(stored.desktop.iter().all(|w| w.updated_at.is_some()));

        let history = h.manager.get_version_history("u1", None).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].description, "Initial layout");
        assert_eq!(h.manager.last_known_layout("u1"), Some(stored));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_save_describes_diff() {
        let h = harness();
        let first = h
            .manager
            .save_layout("u1", layout(), SaveOptions::immediate())
            .await;

        let mut next = first.layout.clone();
        next.desktop[1].y = 4;
        next.desktop.push(Widget::new("clock", WidgetType::Clock).at(0, 8));
        let second = h.manager.save_layout("u1", next, SaveOptions::immediate()).await;

        assert_eq!(second.status, SaveStatus::Saved { version: 2 });
        let latest = h.manager.get_version_history("u1", Some(1)).unwrap();
        assert_eq!(latest[0].description, "1 added, 1 modified");

        // unchanged widget keeps its earlier timestamp
        assert_eq!(second.layout.desktop[0].updated_at, first.layout.desktop[0].updated_at);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_layout_rejected_without_io() {
        let h = harness();
        let bad = Layout::new().with_desktop(vec![
            Widget::new("a", WidgetType::Chart).at(12, 0),
            Widget::new("a", WidgetType::Chart),
        ]);

        let report = h.manager.save_layout("u1", bad, SaveOptions::immediate()).await;

        assert!(report.is_rejected());
        assert!(report.notice().starts_with("Layout rejected: "));
        assert!(report.notice().contains("Duplicate widget id"));
        assert_eq!(h.remote.save_count(), 0);
        assert_eq!(h.remote.load_calls.load(Ordering::SeqCst), 0);
        assert!(h.local.get("dashboard_layout_u1").unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_critical_problems_are_sanitized() {
        let h = harness();
        let fixable = Layout::new().with_desktop(vec![Widget::new("a", WidgetType::Chart)
            .at(10, 0)
            .with_dimensions(4, 2)]);

        let report = h.manager.save_layout("u1", fixable, SaveOptions::immediate()).await;

        assert_eq!(report.status, SaveStatus::Saved { version: 1 });
        assert_eq!(report.layout.desktop[0].x, 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounced_save_is_scheduled() {
        let h = harness();
        let report = h.manager.save_layout("u1", layout(), SaveOptions::default()).await;

        assert_eq!(report.status, SaveStatus::Scheduled);
        assert!(h.manager.has_pending_save());

        tokio::time::sleep(std::time::Duration::from_secs(3)).await;
        assert_eq!(h.remote.save_count(), 1);
        assert_eq!(h.manager.get_version_history("u1", None).unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_saves_for_two_users_both_land() {
        let h = harness();
        let first = h.manager.save_layout("u1", layout(), SaveOptions::default()).await;
        let mut other = layout();
        other.desktop.pop();
        let second = h.manager.save_layout("u2", other, SaveOptions::default()).await;
        assert_eq!(first.status, SaveStatus::Scheduled);
        assert_eq!(second.status, SaveStatus::Scheduled);

        tokio::time::sleep(std::time::Duration::from_secs(5)).await;

        assert_eq!(h.remote.get("u1").unwrap().desktop.len(), 2);
        assert_eq!(h.remote.get("u2").unwrap().desktop.len(), 1);
        assert_eq!(h.manager.get_version_history("u1", None).unwrap().len(), 1);
        assert_eq!(h.manager.get_version_history("u2", None).unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_save_reports_its_own_user() {
        let h = harness();
        h.manager.save_layout("u1", layout(), SaveOptions::default()).await;
        h.manager.save_layout("u2", layout(), SaveOptions::default()).await;
        h.remote.fail_next(1, RemoteError::Rejected("forbidden".into()));

        // u1 keeps its place ahead of u2, so u2's save runs last
        let report = h.manager.save_layout("u1", layout(), SaveOptions::immediate()).await;

        assert!(matches!(report.status, SaveStatus::SavedLocally { .. }), "{:?}", report.status);
        assert!(h.remote.get("u1").is_none());
        assert_eq!(h.remote.get("u2").unwrap().version, 1);
        assert!(!h.manager.has_pending_save());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_failure_saves_locally() {
        let h = harness();
        h.remote.fail_always(RemoteError::Rejected("forbidden".into()));

        let report = h.manager.save_layout("u1", layout(), SaveOptions::immediate()).await;

        assert!(matches!(
            report.status,
            SaveStatus::SavedLocally {
                source: StorageSource::Local,
                ..
            }
        ));
        assert!(report.notice().contains("saved locally"));
        assert!(h.manager.get_version_history("u1", None).unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_save_queues_and_sync_pushes() {
        let h = harness();
        h.connectivity.set_online(false);

        let report = h.manager.save_layout("u1", layout(), SaveOptions::immediate()).await;
        assert_eq!(report.status, SaveStatus::Queued);
        assert_eq!(h.manager.context().queue.len(), 1);

        // offline load sees the newest layout
        let loaded = h.manager.load_layout("u1").await.unwrap();
        assert_eq!(loaded.source, StorageSource::Local);
        assert_eq!(loaded.layout.desktop.len(), 2);

        h.manager.dispose();
        h.connectivity.set_online(true);
        let sync = h.manager.sync("u1").await;

        assert!(sync.online);
        assert_eq!(sync.replay.unwrap().replayed, 1);
        assert_eq!(sync.action, SyncAction::InSync);
        assert_eq!(h.remote.get("u1").unwrap().desktop.len(), 2);
        assert!(h.manager.context().queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_pulls_newer_remote() {
        let h = harness();
        h.manager.save_layout("u1", layout(), SaveOptions::immediate()).await;

        let newer = Layout::new()
            .with_desktop(vec![Widget::new("tasks", WidgetType::Tasks)])
            .with_version(7)
            .with_device("d2")
            .with_updated_at(Utc::now() + Duration::minutes(5));
        h.remote.put("u1", newer);

        let sync = h.manager.sync("u1").await;

        assert_eq!(sync.action, SyncAction::Pulled { version: 7 });
        let local = h.manager.context().gateway.load_local("u1").unwrap();
        assert_eq!(local.layout.desktop[0].id, "tasks");
        assert_eq!(h.manager.last_known_layout("u1").unwrap().version, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_offline_does_nothing() {
        let h = harness();
        h.connectivity.set_online(false);
        let sync = h.manager.sync("u1").await;
        assert!(!sync.online);
        assert_eq!(sync.action, SyncAction::Nothing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_conflict_with_other_device_is_resolved() {
        let h = harness();
        let first = h
            .manager
            .save_layout("u1", layout(), SaveOptions::immediate())
            .await;

        // another device writes a much larger layout two minutes later
        let mut theirs = first.layout.clone();
        theirs.desktop.push(Widget::new("clock", WidgetType::Clock).at(0, 6));
        theirs.desktop.push(Widget::new("news", WidgetType::News).at(0, 8));
        theirs.mobile.push(Widget::new("weather", WidgetType::Weather));
        theirs.version = 2;
        theirs.device_id = Some("d2".into());
        theirs.updated_at = first.layout.updated_at + Duration::minutes(2);
        h.remote.put("u1", theirs);

        let mut mine = first.layout.clone();
        mine.desktop[0].x = 2;
        mine.desktop[0].w = 4;
        let report = h.manager.save_layout("u1", mine, SaveOptions::immediate()).await;

        let resolution = report.conflict.clone().unwrap();
        assert_eq!(resolution.strategy, Strategy::Merge);
        assert!(report.notice().contains("merged"));
        let ids: Vec<&str> = report.layout.desktop.iter().map(|w| w.id.as_str()).collect();
        assert_eq!(ids, vec!["chart", "notes", "clock", "news"]);
        // the locally edited widget is newer than the remote copy
        assert_eq!((report.layout.desktop[0].x, report.layout.desktop[0].w), (2, 4));
        assert_eq!(report.layout.mobile.len(), 1);
        assert_eq!(report.status, SaveStatus::Saved { version: 3 });

        let latest = h.manager.get_version_history("u1", Some(1)).unwrap();
        assert_eq!(latest[0].change_type, ChangeType::ConflictResolution);
    }

    #[tokio::test(start_paused = true)]
    async fn test_own_device_writes_never_conflict() {
        let h = harness();
        let first = h
            .manager
            .save_layout("u1", layout(), SaveOptions::immediate())
            .await;
        let second = h
            .manager
            .save_layout("u1", first.layout.clone(), SaveOptions::immediate())
            .await;
        assert!(second.conflict.is_none());
        assert_eq!(second.status, SaveStatus::Saved { version: 2 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_rollback_goes_through_save() {
        let h = harness();
        h.manager.save_layout("u1", layout(), SaveOptions::immediate()).await;
        let mut changed = layout();
        changed.desktop.truncate(1);
        h.manager.save_layout("u1", changed, SaveOptions::immediate()).await;

        let report = h.manager.rollback_to_version("u1", 1).await.unwrap();

        assert_eq!(report.status, SaveStatus::Saved { version: 3 });
        assert_eq!(h.remote.get("u1").unwrap().desktop.len(), 2);
        let latest = &h.manager.get_version_history("u1", Some(1)).unwrap()[0];
        assert_eq!(latest.description, "Rolled back to version 1");
        assert_eq!(latest.change_type, ChangeType::Manual);

        assert!(matches!(
            h.manager.rollback_to_version("u1", 99).await,
            Err(ManagerError::Version(VersionError::NotFound { .. }))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_sanitizes_and_caches() {
        let h = harness();
        let raw = json!({
            "desktop": [
                {"id": "a", "type": "chart", "x": 11, "y": 0, "w": 4, "h": 2},
                {"id": "a", "type": "notes", "x": 0, "y": 0, "w": 4, "h": 2}
            ],
            "version": 4,
            "updatedAt": "2024-01-01T00:00:00Z"
        });
        let stored: Layout = serde_json::from_value(raw).unwrap();
        h.remote.put("u1", stored);

        let loaded = h.manager.load_layout("u1").await.unwrap();

        assert_eq!(loaded.source, StorageSource::Database);
        assert_eq!(loaded.layout.desktop.len(), 1);
        assert_eq!(loaded.layout.desktop[0].x, 8);
        assert_eq!(h.manager.last_known_layout("u1").unwrap().version, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_reach_subscribers() {
        let h = harness();
        let successes = Arc::new(AtomicUsize::new(0));
        let counter = successes.clone();
        h.manager.on(EventKind::Success, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        h.manager.save_layout("u1", layout(), SaveOptions::immediate()).await;
        assert_eq!(successes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_pending_save() {
        let h = harness();
        h.manager.save_layout("u1", layout(), SaveOptions::default()).await;
        h.manager.cancel_pending_save();
        tokio::time::sleep(std::time::Duration::from_secs(3)).await;
        assert_eq!(h.remote.save_count(), 0);
        assert!(h.manager.flush().await.is_none());
    }
}
