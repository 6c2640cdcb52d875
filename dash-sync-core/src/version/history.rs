//! Bounded, append-only version history per layout.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info};

use super::checksum::generate_checksum;
use crate::models::{ChangeType, Layout, LayoutVersion};
use crate::storage::{KeyValueStore, StorageError};

/// Key prefix for a layout's version records.
const VERSION_KEY_PREFIX: &str = "layout_versions_";

#[derive(Error, Debug)]
pub enum VersionError {
    #[error("Version {version} not found for layout '{layout_id}'")]
    NotFound { layout_id: String, version: u64 },

    #[error("Version storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Corrupt version history: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Records and queries layout versions in a key-value store.
///
/// Records are kept oldest-first under `layout_versions_<layout_id>`.
pub struct VersionService {
    store: Arc<dyn KeyValueStore>,
    max_versions: usize,
    write_lock: Mutex<()>,
}

impl VersionService {
    pub fn new(store: Arc<dyn KeyValueStore>, max_versions: usize) -> Self {
        Self {
            store,
            max_versions,
            write_lock: Mutex::new(()),
        }
    }

    pub fn max_versions(&self) -> usize {
        self.max_versions
    }

    /// Appends a version numbered one past the latest record, or at the
    /// layout's own version when that is higher, then prunes beyond the cap.
    pub fn create_version(
        &self,
        layout_id: &str,
        layout: &Layout,
        description: impl Into<String>,
        device_id: Option<&str>,
        change_type: ChangeType,
    ) -> Result<LayoutVersion, VersionError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut records = self.read(layout_id)?;

        let previous = records.last().map(|v| v.version).unwrap_or(0);
        let version = LayoutVersion {
            layout_id: layout_id.to_string(),
            version: previous.saturating_add(1).max(layout.version),
            desktop: layout.desktop.clone(),
            mobile: layout.mobile.clone(),
            checksum: generate_checksum(layout),
            description: description.into(),
            device_id: device_id.map(str::to_string),
            change_type,
            created_at: Utc::now(),
        };
        records.push(version.clone());

        let pruned = prune(&mut records, self.max_versions);
        self.write(layout_id, &records)?;

        info!(layout_id, version = version.version, %change_type, "recorded layout version");
        if pruned > 0 {
            debug!(layout_id, pruned, "pruned old layout versions");
        }
        Ok(version)
    }

    /// Most-recent-first, at most `limit` records when given.
    pub fn get_version_history(
        &self,
        layout_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<LayoutVersion>, VersionError> {
        let records = self.read(layout_id)?;
        let limit = limit.unwrap_or(records.len());
        Ok(records.into_iter().rev().take(limit).collect())
    }

    pub fn get_version(&self, layout_id: &str, version: u64) -> Result<Option<LayoutVersion>, VersionError> {
        Ok(self.read(layout_id)?.into_iter().find(|v| v.version == version))
    }

    pub fn latest_version(&self, layout_id: &str) -> Result<Option<LayoutVersion>, VersionError> {
        Ok(self.read(layout_id)?.pop())
    }

    /// Rebuilds the layout stored at `version`. Nothing is written; callers
    /// persist the result as a new save.
    pub fn rollback_to_version(&self, layout_id: &str, version: u64) -> Result<Layout, VersionError> {
        let record = self
            .get_version(layout_id, version)?
            .ok_or_else(|| VersionError::NotFound {
                layout_id: layout_id.to_string(),
                version,
            })?;

        let mut layout = Layout::new()
            .with_desktop(record.desktop)
            .with_mobile(record.mobile)
            .with_version(record.version);
        layout.checksum = Some(record.checksum);
        layout.device_id = record.device_id;
        Ok(layout)
    }

    /// Keeps the newest `keep_count` records and returns how many were removed.
    pub fn cleanup_old_versions(&self, layout_id: &str, keep_count: usize) -> Result<usize, VersionError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut records = self.read(layout_id)?;
        let pruned = prune(&mut records, keep_count);
        if pruned > 0 {
            self.write(layout_id, &records)?;
        }
        Ok(pruned)
    }

    fn key(layout_id: &str) -> String {
        format!("{}{}", VERSION_KEY_PREFIX, layout_id)
    }

    fn read(&self, layout_id: &str) -> Result<Vec<LayoutVersion>, VersionError> {
        match self.store.get(&Self::key(layout_id))? {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Vec::new()),
        }
    }

    fn write(&self, layout_id: &str, records: &[LayoutVersion]) -> Result<(), VersionError> {
        let json = serde_json::to_string(records)?;
        self.store.set(&Self::key(layout_id), &json)?;
        Ok(())
    }
}

fn prune(records: &mut Vec<LayoutVersion>, keep: usize) -> usize {
    let excess = records.len().saturating_sub(keep);
    records.drain(..excess);
    excess
}
