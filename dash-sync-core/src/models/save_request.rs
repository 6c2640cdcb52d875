use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::layout::Layout;
use super::layout_version::ChangeType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SavePriority {
    Low,
    #[default]
    Normal,
    High,
}

impl fmt::Display for SavePriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SavePriority::Low => write!(f, "low"),
            SavePriority::Normal => write!(f, "normal"),
            SavePriority::High => write!(f, "high"),
        }
    }
}

impl FromStr for SavePriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(SavePriority::Low),
            "normal" => Ok(SavePriority::Normal),
            "high" => Ok(SavePriority::High),
            _ => Err(format!(
                "Invalid priority '{}'. Valid options: low, normal, high",
                s
            )),
        }
    }
}

/// A unit of save work produced by each auto-save trigger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SaveRequest {
    pub user_id: String,
    pub layout: Layout,
    /// Creation time; also the identity of the request inside the offline queue.
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub priority: SavePriority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub change_type: ChangeType,
}

impl SaveRequest {
    pub fn new(user_id: impl Into<String>, layout: Layout, priority: SavePriority) -> Self {
        Self {
            user_id: user_id.into(),
            layout,
            created_at: Utc::now(),
            retry_count: 0,
            priority,
            description: None,
            change_type: ChangeType::Auto,
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

/// A save request held durably while the client is offline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OfflineQueueEntry {
    pub request: SaveRequest,
    pub queued_at: DateTime<Utc>,
}

impl OfflineQueueEntry {
    pub fn new(request: SaveRequest) -> Self {
        Self {
            request,
            queued_at: Utc::now(),
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.request.created_at
    }
}
