mod conflict_metadata;
mod layout;
mod layout_version;
mod save_request;
mod widget;
mod widget_kind;

pub use conflict_metadata::ConflictMetadata;
pub use layout::{Breakpoint, Layout};
pub use layout_version::{ChangeType, LayoutVersion};
pub use save_request::{OfflineQueueEntry, SavePriority, SaveRequest};
pub use widget::{Widget, GRID_COLUMNS};
pub use widget_kind::{WidgetSize, WidgetType};
