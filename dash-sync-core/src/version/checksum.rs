use sha2::{Digest, Sha256};

use crate::models::{Layout, Widget};

/// Number of hex characters kept from the digest.
const CHECKSUM_LEN: usize = 16;

/// Content fingerprint of a layout's widget collections.
///
/// Computed as: hex(sha256(json(desktop) + "|" + json(mobile)))[0:16] with
/// every widget's `updatedAt` left out. Widget order matters; `version`,
/// `deviceId` and timestamps do not.
pub fn generate_checksum(layout: &Layout) -> String {
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_vec(&content(&layout.desktop)).unwrap_or_default());
    hasher.update(b"|");
    hasher.update(serde_json::to_vec(&content(&layout.mobile)).unwrap_or_default());
    let hash = hasher.finalize();

    hash.iter()
        .take(CHECKSUM_LEN / 2)
        .map(|b| format!("{:02x}", b))
        .collect()
}

fn content(widgets: &[Widget]) -> Vec<Widget> {
    widgets
        .iter()
        .map(|w| Widget {
            updated_at: None,
            ..w.clone()
        })
        .collect()
}

/// Returns a copy of `layout` with its checksum refreshed.
pub fn with_checksum(mut layout: Layout) -> Layout {
    layout.checksum = Some(generate_checksum(&layout));
    layout
}
