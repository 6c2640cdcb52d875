use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::widget::Widget;

/// Why a layout version was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Manual,
    #[default]
    Auto,
    Migration,
    ConflictResolution,
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeType::Manual => write!(f, "manual"),
            ChangeType::Auto => write!(f, "auto"),
            ChangeType::Migration => write!(f, "migration"),
            ChangeType::ConflictResolution => write!(f, "conflict_resolution"),
        }
    }
}

impl FromStr for ChangeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "manual" => Ok(ChangeType::Manual),
            "auto" => Ok(ChangeType::Auto),
            "migration" => Ok(ChangeType::Migration),
            "conflict_resolution" => Ok(ChangeType::ConflictResolution),
            _ => Err(format!(
                "Invalid change type '{}'. Valid options: manual, auto, migration, conflict_resolution",
                s
            )),
        }
    }
}

/// Immutable historical snapshot of a layout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LayoutVersion {
    pub layout_id: String,
    pub version: u64,
    pub desktop: Vec<Widget>,
    pub mobile: Vec<Widget>,
    pub checksum: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    pub change_type: ChangeType,
    pub created_at: DateTime<Utc>,
}

impl fmt::Display for LayoutVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "v{} [{}] {} ({})",
            self.version,
            self.change_type,
            self.description,
            self.created_at.format("%Y-%m-%d %H:%M:%S")
        )?;
        if let Some(device) = &self.device_id {
            write!(f, " from {}", device)?;
        }
        Ok(())
    }
}
