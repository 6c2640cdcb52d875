//! Debounced auto-save with single-flight execution, retry and offline hand-off.

mod events;
mod orchestrator;
mod retry;

pub use events::{AutoSaveEvent, EventHandler, EventKind, EventRegistry};
pub use orchestrator::{AutoSave, AutoSaveResult, GatewayExecutor, SaveExecutor, SavePhase, SaveRecord};
pub use retry::RetryPolicy;
