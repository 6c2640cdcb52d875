mod config_cmd;
mod history;
mod layout;
mod queue_cmd;
mod sync_cmd;

pub use config_cmd::ConfigCommand;
pub use history::HistoryCommand;
pub use layout::LayoutCommand;
pub use queue_cmd::QueueCommand;
pub use sync_cmd::SyncCommand;
