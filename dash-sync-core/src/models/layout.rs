use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::widget::Widget;

/// Which widget collection of a layout a widget belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Breakpoint {
    Desktop,
    Mobile,
}

impl Breakpoint {
    pub const ALL: [Breakpoint; 2] = [Breakpoint::Desktop, Breakpoint::Mobile];
}

impl fmt::Display for Breakpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Breakpoint::Desktop => write!(f, "desktop"),
            Breakpoint::Mobile => write!(f, "mobile"),
        }
    }
}

/// A user's full widget arrangement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Layout {
    #[serde(default)]
    pub desktop: Vec<Widget>,
    #[serde(default)]
    pub mobile: Vec<Widget>,
    #[serde(default)]
    pub version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Layout {
    pub fn new() -> Self {
        Self {
            desktop: Vec::new(),
            mobile: Vec::new(),
            version: 0,
            checksum: None,
            device_id: None,
            updated_at: Utc::now(),
        }
    }

    pub fn with_desktop(mut self, widgets: Vec<Widget>) -> Self {
        self.desktop = widgets;
        self
    }

    pub fn with_mobile(mut self, widgets: Vec<Widget>) -> Self {
        self.mobile = widgets;
        self
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    pub fn with_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    pub fn with_updated_at(mut self, updated_at: DateTime<Utc>) -> Self {
        self.updated_at = updated_at;
        self
    }

    pub fn widgets(&self, breakpoint: Breakpoint) -> &[Widget] {
        match breakpoint {
            Breakpoint::Desktop => &self.desktop,
            Breakpoint::Mobile => &self.mobile,
        }
    }

    pub fn widgets_mut(&mut self, breakpoint: Breakpoint) -> &mut Vec<Widget> {
        match breakpoint {
            Breakpoint::Desktop => &mut self.desktop,
            Breakpoint::Mobile => &mut self.mobile,
        }
    }

    pub fn find(&self, breakpoint: Breakpoint, id: &str) -> Option<&Widget> {
        self.widgets(breakpoint).iter().find(|w| w.id == id)
    }

    /// Total number of widgets across both collections.
    pub fn widget_count(&self) -> usize {
        self.desktop.len() + self.mobile.len()
    }
}

impl Default for Layout {
    fn default() -> Self {
        Self::new()
    }
}
