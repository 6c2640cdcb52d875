//! Checksums, layout diffs and version history.

mod checksum;
mod diff;
mod history;

pub use checksum::{generate_checksum, with_checksum};
pub use diff::{compare_versions, generate_description, Change, ChangeKind};
pub use history::{VersionError, VersionService};
