use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::widget_kind::{WidgetSize, WidgetType};

/// Number of columns in the layout grid.
pub const GRID_COLUMNS: u32 = 12;

/// One positioned, sized panel within a layout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Widget {
    pub id: String,
    #[serde(rename = "type")]
    pub widget_type: WidgetType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<WidgetSize>,
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
    #[serde(rename = "static", default, skip_serializing_if = "Option::is_none")]
    pub is_static: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_w: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_w: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_h: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_h: Option<u32>,
    /// Last modification of this widget, used when merging layouts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Widget {
    pub fn new(id: impl Into<String>, widget_type: WidgetType) -> Self {
        Self {
            id: id.into(),
            widget_type,
            size: None,
            x: 0,
            y: 0,
            w: 4,
            h: 2,
            is_static: None,
            min_w: None,
            max_w: None,
            min_h: None,
            max_h: None,
            updated_at: None,
        }
    }

    pub fn at(mut self, x: u32, y: u32) -> Self {
        self.x = x;
        self.y = y;
        self
    }

    pub fn with_dimensions(mut self, w: u32, h: u32) -> Self {
        self.w = w;
        self.h = h;
        self
    }

    pub fn with_size(mut self, size: WidgetSize) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_static(mut self, is_static: bool) -> Self {
        self.is_static = Some(is_static);
        self
    }

    pub fn touched_at(mut self, at: DateTime<Utc>) -> Self {
        self.updated_at = Some(at);
        self
    }

    /// True if the widget satisfies the grid invariants.
    pub fn fits_grid(&self) -> bool {
        self.x < GRID_COLUMNS
            && (1..=GRID_COLUMNS).contains(&self.w)
            && self.x + self.w <= GRID_COLUMNS
            && self.h >= 1
    }

    /// True if position, dimensions, type or size differ.
    pub fn differs_from(&self, other: &Widget) -> bool {
        self.x != other.x
            || self.y != other.y
            || self.w != other.w
            || self.h != other.h
            || self.widget_type != other.widget_type
            || self.size != other.size
    }
}

impl fmt::Display for Widget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) at ({}, {}) {}x{}",
            self.id, self.widget_type, self.x, self.y, self.w, self.h
        )?;
        if let Some(size) = self.size {
            write!(f, " [{}]", size)?;
        }
        if self.is_static == Some(true) {
            write!(f, " static")?;
        }
        Ok(())
    }
}
