use std::collections::HashMap;

use crate::models::{WidgetSize, WidgetType};

/// Known configuration for a widget type.
#[derive(Debug, Clone, PartialEq)]
pub struct WidgetSpec {
    pub allowed_sizes: Vec<WidgetSize>,
    pub default_size: WidgetSize,
}

impl WidgetSpec {
    pub fn new(allowed_sizes: Vec<WidgetSize>, default_size: WidgetSize) -> Self {
        Self {
            allowed_sizes,
            default_size,
        }
    }

    pub fn allows(&self, size: WidgetSize) -> bool {
        self.allowed_sizes.contains(&size)
    }
}

/// Side-table of per-type widget configuration consulted by the validator.
///
/// Types without an entry are still valid; they only produce a warning.
#[derive(Debug, Clone, Default)]
pub struct WidgetRegistry {
    specs: HashMap<WidgetType, WidgetSpec>,
}

impl WidgetRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with the stock configuration for every built-in type except
    /// `links`, which is configured by the host application.
    pub fn builtin() -> Self {
        use WidgetSize::*;

        Self::empty()
            .with(WidgetType::Metrics, WidgetSpec::new(vec![Small, Medium, Large], Small))
            .with(WidgetType::Chart, WidgetSpec::new(vec![Medium, Large, Wide, Full], Medium))
            .with(WidgetType::Activity, WidgetSpec::new(vec![Medium, Large, Wide], Medium))
            .with(WidgetType::Tasks, WidgetSpec::new(vec![Small, Medium, Large], Medium))
            .with(WidgetType::Calendar, WidgetSpec::new(vec![Medium, Large, Full], Large))
            .with(WidgetType::Notes, WidgetSpec::new(vec![Small, Medium, Large], Small))
            .with(WidgetType::Weather, WidgetSpec::new(vec![Small, Medium], Small))
            .with(WidgetType::Clock, WidgetSpec::new(vec![Small], Small))
            .with(WidgetType::News, WidgetSpec::new(vec![Medium, Large, Wide], Wide))
    }

    pub fn with(mut self, widget_type: WidgetType, spec: WidgetSpec) -> Self {
        self.register(widget_type, spec);
        self
    }

    pub fn register(&mut self, widget_type: WidgetType, spec: WidgetSpec) {
        self.specs.insert(widget_type, spec);
    }

    pub fn get(&self, widget_type: WidgetType) -> Option<&WidgetSpec> {
        self.specs.get(&widget_type)
    }
}
