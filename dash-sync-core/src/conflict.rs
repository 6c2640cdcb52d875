//! Cross-device conflict detection and resolution.

use std::fmt;
use std::str::FromStr;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::config::ConflictConfig;
use crate::models::{Breakpoint, ConflictMetadata, Layout, Widget};
use crate::version::generate_checksum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Local,
    Remote,
    Merge,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Local => write!(f, "local"),
            Strategy::Remote => write!(f, "remote"),
            Strategy::Merge => write!(f, "merge"),
        }
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Strategy::Local),
            "remote" => Ok(Strategy::Remote),
            "merge" => Ok(Strategy::Merge),
            _ => Err(format!(
                "Invalid strategy '{}'. Valid options: local, remote, merge",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub strategy: Strategy,
    pub reason: String,
}

impl Resolution {
    fn new(strategy: Strategy, reason: &str) -> Self {
        Self {
            strategy,
            reason: reason.to_string(),
        }
    }
}

/// Decides whether two layout snapshots conflict and how to reconcile them.
#[derive(Debug, Clone, Default)]
pub struct ConflictResolver {
    config: ConflictConfig,
}

impl ConflictResolver {
    pub fn new(config: ConflictConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ConflictConfig {
        &self.config
    }

    fn threshold(&self) -> Duration {
        Duration::seconds(self.config.recency_threshold_secs)
    }

    /// A conflict exists only when the local client is known to be behind a
    /// write made by a different device.
    pub fn detect_conflict(
        &self,
        local: &Layout,
        remote: &Layout,
        local_meta: Option<&ConflictMetadata>,
        remote_meta: Option<&ConflictMetadata>,
    ) -> bool {
        let (Some(local_meta), Some(remote_meta)) = (local_meta, remote_meta) else {
            return false;
        };
        if local_meta.device_id == remote_meta.device_id {
            return false;
        }
        if generate_checksum(local) == generate_checksum(remote) {
            return false;
        }

        remote_meta.last_modified > local_meta.last_modified
            && local_meta.local_version < remote_meta.remote_version
    }

    pub fn suggest_resolution(
        &self,
        local: &Layout,
        remote: &Layout,
        local_meta: Option<&ConflictMetadata>,
        remote_meta: Option<&ConflictMetadata>,
    ) -> Resolution {
        let Some(remote_meta) = remote_meta else {
            return Resolution::new(Strategy::Local, "no remote metadata");
        };
        let Some(local_meta) = local_meta else {
            return Resolution::new(Strategy::Remote, "no local metadata");
        };
        if local_meta.device_id == remote_meta.device_id {
            return Resolution::new(Strategy::Remote, "remote change came from this device");
        }

        let age = remote_meta.last_modified - local_meta.last_modified;
        let local_count = local.widget_count();
        let remote_count = remote.widget_count();

        if age > self.threshold() {
            if remote_count as f64 >= local_count as f64 * self.config.merge_ratio {
                return Resolution::new(Strategy::Merge, "remote has significantly more widgets");
            }
            return Resolution::new(Strategy::Remote, "remote is significantly newer");
        }
        if -age > self.threshold() {
            return Resolution::new(Strategy::Local, "local is significantly newer");
        }
        if local_count.abs_diff(remote_count) > self.config.count_delta {
            return Resolution::new(Strategy::Merge, "widget counts differ substantially");
        }
        Resolution::new(Strategy::Merge, "changes are close in time")
    }

    /// Applies a strategy. Pure: neither input is modified.
    ///
    /// `Local` keeps the local widgets but adopts the higher version number so
    /// the next save is not behind the remote.
    pub fn resolve_conflict(&self, local: &Layout, remote: &Layout, strategy: Strategy) -> Layout {
        match strategy {
            Strategy::Remote => remote.clone(),
            Strategy::Local => {
                let mut layout = local.clone();
                layout.version = local.version.max(remote.version);
                layout
            }
            Strategy::Merge => merge_layouts(local, remote),
        }
    }
}

/// Merges each collection by widget id; shared widgets go to the side with
/// the strictly newer `updatedAt`, ties and missing timestamps to remote.
pub fn merge_layouts(local: &Layout, remote: &Layout) -> Layout {
    let mut merged = Layout::new()
        .with_version(local.version.max(remote.version))
        .with_updated_at(local.updated_at.max(remote.updated_at));
    merged.device_id = local.device_id.clone();

    for breakpoint in Breakpoint::ALL {
        *merged.widgets_mut(breakpoint) =
            merge_collection(local.widgets(breakpoint), remote.widgets(breakpoint));
    }

    merged.checksum = Some(generate_checksum(&merged));
    merged
}

fn merge_collection(local: &[Widget], remote: &[Widget]) -> Vec<Widget> {
    let mut merged: Vec<Widget> = local
        .iter()
        .map(|mine| match remote.iter().find(|theirs| theirs.id == mine.id) {
            Some(theirs) if mine.updated_at > theirs.updated_at => mine.clone(),
            Some(theirs) => theirs.clone(),
            None => mine.clone(),
        })
        .collect();

    merged.extend(
        remote
            .iter()
            .filter(|theirs| !local.iter().any(|mine| mine.id == theirs.id))
            .cloned(),
    );
    merged
}
