use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::layout::Layout;

/// Lightweight description of where a layout snapshot came from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConflictMetadata {
    /// Version this snapshot was derived from on its device.
    pub local_version: u64,
    /// Newest remote version the device had seen.
    pub remote_version: u64,
    pub last_modified: DateTime<Utc>,
    pub device_id: String,
}

impl ConflictMetadata {
    pub fn new(version: u64, last_modified: DateTime<Utc>, device_id: impl Into<String>) -> Self {
        Self {
            local_version: version,
            remote_version: version,
            last_modified,
            device_id: device_id.into(),
        }
    }

    /// Builds metadata from a layout snapshot. Returns `None` when the layout
    /// carries no device id, since its origin cannot be compared.
    pub fn from_layout(layout: &Layout) -> Option<Self> {
        layout
            .device_id
            .as_ref()
            .map(|device| Self::new(layout.version, layout.updated_at, device.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_layout_requires_device() {
        let layout = Layout::new().with_version(4);
        assert!(ConflictMetadata::from_layout(&layout).is_none());

        let meta = ConflictMetadata::from_layout(&layout.with_device("tablet")).unwrap();
        assert_eq!(meta.local_version, 4);
        assert_eq!(meta.remote_version, 4);
        assert_eq!(meta.device_id, "tablet");
    }
}
