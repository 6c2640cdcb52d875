use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::SaveError;

/// Event names consumers can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Start,
    Success,
    Retry,
    Error,
    Offline,
    Online,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Start => write!(f, "start"),
            EventKind::Success => write!(f, "success"),
            EventKind::Retry => write!(f, "retry"),
            EventKind::Error => write!(f, "error"),
            EventKind::Offline => write!(f, "offline"),
            EventKind::Online => write!(f, "online"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AutoSaveEvent {
    Start { user_id: String },
    Success { user_id: String, duration: Duration },
    Retry { user_id: String, attempt: u32, delay: Duration },
    Error { user_id: String, error: SaveError },
    Offline,
    Online,
}

impl AutoSaveEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            AutoSaveEvent::Start { .. } => EventKind::Start,
            AutoSaveEvent::Success { .. } => EventKind::Success,
            AutoSaveEvent::Retry { .. } => EventKind::Retry,
            AutoSaveEvent::Error { .. } => EventKind::Error,
            AutoSaveEvent::Offline => EventKind::Offline,
            AutoSaveEvent::Online => EventKind::Online,
        }
    }
}

pub type EventHandler = Arc<dyn Fn(&AutoSaveEvent) + Send + Sync>;

/// Handler-per-event-name registry.
#[derive(Default)]
pub struct EventRegistry {
    handlers: Mutex<HashMap<EventKind, Vec<EventHandler>>>,
}

impl EventRegistry {
    pub fn on(&self, kind: EventKind, handler: EventHandler) {
        self.handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(kind)
            .or_default()
            .push(handler);
    }

    /// Handlers run outside the registry lock, so they may register more.
    pub fn emit(&self, event: &AutoSaveEvent) {
        let handlers = self
            .handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&event.kind())
            .cloned()
            .unwrap_or_default();
        for handler in handlers {
            handler(event);
        }
    }
}
