use serde::Serialize;
use std::fmt;

use crate::models::{Breakpoint, Layout, Widget, WidgetType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Removed,
    Modified,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Added => write!(f, "added"),
            ChangeKind::Removed => write!(f, "removed"),
            ChangeKind::Modified => write!(f, "modified"),
        }
    }
}

/// One widget-level difference between two layouts.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Change {
    pub kind: ChangeKind,
    pub breakpoint: Breakpoint,
    pub widget_id: String,
    pub widget_type: WidgetType,
    pub previous: Option<Widget>,
    pub current: Option<Widget>,
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} {}", self.breakpoint, self.kind, self.widget_id)?;
        match (&self.previous, &self.current) {
            (Some(prev), Some(cur)) => write!(
                f,
                ": ({}, {}) {}x{} -> ({}, {}) {}x{}",
                prev.x, prev.y, prev.w, prev.h, cur.x, cur.y, cur.w, cur.h
            ),
            _ => write!(f, " ({})", self.widget_type),
        }
    }
}

/// Diffs two layouts, desktop first then mobile.
///
/// Within a collection, removals and modifications follow `previous` order,
/// additions follow `current` order.
pub fn compare_versions(previous: &Layout, current: &Layout) -> Vec<Change> {
    let mut changes = Vec::new();

    for breakpoint in Breakpoint::ALL {
        let before = previous.widgets(breakpoint);
        let after = current.widgets(breakpoint);

        for old in before {
            match after.iter().find(|w| w.id == old.id) {
                None => changes.push(Change {
                    kind: ChangeKind::Removed,
                    breakpoint,
                    widget_id: old.id.clone(),
                    widget_type: old.widget_type,
                    previous: Some(old.clone()),
                    current: None,
                }),
                Some(new) if old.differs_from(new) => changes.push(Change {
                    kind: ChangeKind::Modified,
                    breakpoint,
                    widget_id: old.id.clone(),
                    widget_type: new.widget_type,
                    previous: Some(old.clone()),
                    current: Some(new.clone()),
                }),
                Some(_) => {}
            }
        }

        for new in after {
            if !before.iter().any(|w| w.id == new.id) {
                changes.push(Change {
                    kind: ChangeKind::Added,
                    breakpoint,
                    widget_id: new.id.clone(),
                    widget_type: new.widget_type,
                    previous: None,
                    current: Some(new.clone()),
                });
            }
        }
    }

    changes
}

/// Short human summary such as "2 added, 1 modified".
pub fn generate_description(changes: &[Change]) -> String {
    let parts: Vec<String> = [ChangeKind::Added, ChangeKind::Removed, ChangeKind::Modified]
        .into_iter()
        .filter_map(|kind| {
            let count = changes.iter().filter(|c| c.kind == kind).count();
            (count > 0).then(|| format!("{} {}", count, kind))
        })
        .collect();

    if parts.is_empty() {
        "No changes".to_string()
    } else {
        parts.join(", ")
    }
}
