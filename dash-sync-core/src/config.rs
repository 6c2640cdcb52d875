//! Engine tunables.
//!
//! All caps, delays and thresholds live here so hosts can override them from
//! their own configuration files. Durations are expressed in milliseconds
//! (seconds for the conflict threshold).

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub autosave: AutoSaveConfig,
    pub storage: StorageConfig,
    pub queue: QueueConfig,
    pub versions: VersionConfig,
    pub conflict: ConflictConfig,
    pub optimistic: OptimisticConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AutoSaveConfig {
    pub debounce_ms: u64,
    pub high_priority_delay_ms: u64,
    pub max_retries: u32,
    pub base_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    pub max_jitter_ms: u64,
    pub history_cap: usize,
}

impl Default for AutoSaveConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 2000,
            high_priority_delay_ms: 100,
            max_retries: 3,
            base_retry_delay_ms: 1000,
            max_retry_delay_ms: 30_000,
            max_jitter_ms: 500,
            history_cap: 100,
        }
    }
}

impl AutoSaveConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn high_priority_delay(&self) -> Duration {
        Duration::from_millis(self.high_priority_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub debounce_ms: u64,
    pub key_prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 1000,
            debounce_ms: 500,
            key_prefix: "dashboard_layout_".to_string(),
        }
    }
}

impl StorageConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn key_for(&self, user_id: &str) -> String {
        format!("{}{}", self.key_prefix, user_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueueConfig {
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { capacity: 10 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VersionConfig {
    pub max_versions: usize,
}

impl Default for VersionConfig {
    fn default() -> Self {
        Self { max_versions: 50 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConflictConfig {
    /// Whether the persistence manager checks for cross-device conflicts.
    pub enabled: bool,
    pub recency_threshold_secs: i64,
    pub merge_ratio: f64,
    pub count_delta: usize,
}

impl Default for ConflictConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            recency_threshold_secs: 60,
            merge_ratio: 1.5,
            count_delta: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OptimisticConfig {
    pub expiry_ms: u64,
}

impl Default for OptimisticConfig {
    fn default() -> Self {
        Self { expiry_ms: 5000 }
    }
}

impl OptimisticConfig {
    pub fn expiry(&self) -> Duration {
        Duration::from_millis(self.expiry_ms)
    }
}
