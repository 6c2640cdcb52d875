//! Structural validation and sanitization of widget layouts.

mod registry;
mod validator;

pub use registry::{WidgetRegistry, WidgetSpec};
pub use validator::{
    LayoutValidator, Severity, ValidationIssue, ValidationReport, ValidationWarning,
    MAX_RECOMMENDED_HEIGHT,
};
