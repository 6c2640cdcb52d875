use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use super::registry::WidgetRegistry;
use crate::models::{Widget, WidgetSize, WidgetType, GRID_COLUMNS};

/// Heights above this many rows are accepted but flagged.
pub const MAX_RECOMMENDED_HEIGHT: i64 = 24;

const COLUMNS: i64 = GRID_COLUMNS as i64;

/// Only `Critical` issues make a layout invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Critical => write!(f, "critical"),
            Severity::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationIssue {
    pub widget_id: Option<String>,
    pub field: String,
    pub message: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationWarning {
    pub widget_id: Option<String>,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.widget_id {
            Some(id) => write!(f, "{}.{}: {}", id, self.field, self.message),
            None => write!(f, "{}: {}", self.field, self.message),
        }
    }
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.widget_id {
            Some(id) => write!(f, "{}.{}: {}", id, self.field, self.message),
            None => write!(f, "{}: {}", self.field, self.message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationReport {
    fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn push(&mut self, widget_id: Option<&str>, field: &str, message: String, severity: Severity) {
        if severity == Severity::Critical {
            self.valid = false;
        }
        self.errors.push(ValidationIssue {
            widget_id: widget_id.map(str::to_string),
            field: field.to_string(),
            message,
            severity,
        });
    }

    fn warn(&mut self, widget_id: Option<&str>, field: &str, message: String) {
        self.warnings.push(ValidationWarning {
            widget_id: widget_id.map(str::to_string),
            field: field.to_string(),
            message,
        });
    }

    fn absorb(&mut self, other: ValidationReport) {
        self.valid &= other.valid;
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    pub fn critical(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.errors
            .iter()
            .filter(|e| e.severity == Severity::Critical)
    }

    /// One line per critical issue, for rejection messages.
    pub fn summary(&self) -> String {
        self.critical()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Structural validation and sanitization of widget layouts.
#[derive(Debug, Clone)]
pub struct LayoutValidator {
    registry: WidgetRegistry,
}

impl Default for LayoutValidator {
    fn default() -> Self {
        Self::builtin()
    }
}

impl LayoutValidator {
    pub fn new(registry: WidgetRegistry) -> Self {
        Self { registry }
    }

    /// Validator backed by the built-in widget registry.
    pub fn builtin() -> Self {
        Self::new(WidgetRegistry::builtin())
    }

    pub fn registry(&self) -> &WidgetRegistry {
        &self.registry
    }

    pub fn validate_widget(&self, candidate: &Value) -> ValidationReport {
        let mut report = ValidationReport::new();

        let Some(obj) = candidate.as_object() else {
            report.push(None, "widget", "Widget must be an object".into(), Severity::Critical);
            return report;
        };

        let id = obj.get("id").and_then(Value::as_str).filter(|s| !s.is_empty());
        if id.is_none() {
            report.push(None, "id", "Widget id must be a non-empty string".into(), Severity::Critical);
        }

        let widget_type = self.check_type(obj, id, &mut report);
        self.check_size(obj, id, widget_type, &mut report);

        let [x, y, w, h] = ["x", "y", "w", "h"].map(|field| {
            let value = obj.get(field).and_then(Value::as_i64);
            if value.is_none() {
                report.push(
                    id,
                    field,
                    format!("{} is required and must be an integer", field),
                    Severity::Critical,
                );
            }
            value
        });

        if let Some(x) = x {
            if x < 0 {
                report.push(id, "x", format!("x must be >= 0, got {}", x), Severity::Critical);
            } else if x >= COLUMNS {
                report.push(id, "x", format!("x must be <= {}, got {}", COLUMNS - 1, x), Severity::Critical);
            }
        }
        if let Some(y) = y {
            if y < 0 {
                report.push(id, "y", format!("y must be >= 0, got {}", y), Severity::Critical);
            }
        }
        if let Some(w) = w {
            if !(1..=COLUMNS).contains(&w) {
                report.push(id, "w", format!("w must be between 1 and {}, got {}", COLUMNS, w), Severity::Error);
            }
            if let Some(x) = x {
                let end = x.saturating_add(w);
                if end > COLUMNS {
                    report.push(
                        id,
                        "w",
                        format!("x + w must not exceed {} columns, got {}", COLUMNS, end),
                        Severity::Error,
                    );
                }
            }
        }
        if let Some(h) = h {
            if h < 1 {
                report.push(id, "h", format!("h must be >= 1, got {}", h), Severity::Error);
            } else if h > MAX_RECOMMENDED_HEIGHT {
                report.warn(
                    id,
                    "h",
                    format!("h of {} exceeds the recommended maximum of {}", h, MAX_RECOMMENDED_HEIGHT),
                );
            }
        }

        check_constraints(obj, id, w, h, &mut report);

        if let Some(value) = obj.get("static") {
            if !value.is_boolean() && !value.is_null() {
                report.push(id, "static", "static must be a boolean".into(), Severity::Error);
            }
        }

        report
    }

    /// Validates every widget of one collection and checks id uniqueness.
    pub fn validate_layout(&self, candidates: &[Value]) -> ValidationReport {
        let mut report = ValidationReport::new();
        let mut seen = HashSet::new();

        for candidate in candidates {
            report.absorb(self.validate_widget(candidate));

            if let Some(id) = candidate.get("id").and_then(Value::as_str) {
                if !id.is_empty() && !seen.insert(id) {
                    report.push(Some(id), "id", format!("Duplicate widget id '{}'", id), Severity::Critical);
                }
            }
        }

        report
    }

    pub fn validate_widgets(&self, widgets: &[Widget]) -> ValidationReport {
        self.validate_layout(&to_values(widgets))
    }

    /// Coerces a candidate into a legal widget, or drops it (`None`) when it
    /// has no usable id or an unrecognized type.
    pub fn sanitize_widget(&self, candidate: &Value) -> Option<Widget> {
        let obj = candidate.as_object()?;
        let id = obj
            .get("id")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())?;

        let widget_type = match obj.get("type") {
            None | Some(Value::Null) => WidgetType::default(),
            Some(Value::String(s)) => s.parse().ok()?,
            Some(_) => return None,
        };

        let spec = self.registry.get(widget_type);
        let size = obj
            .get("size")
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<WidgetSize>().ok())
            .filter(|s| spec.map_or(true, |spec| spec.allows(*s)))
            .or_else(|| spec.map(|spec| spec.default_size));
        let (default_w, default_h) = size.map(|s| s.dimensions()).unwrap_or((4, 2));

        let mut min_w = coerce_int(obj.get("minW")).filter(|v| (1..=COLUMNS).contains(v));
        let mut max_w = coerce_int(obj.get("maxW")).filter(|v| (1..=COLUMNS).contains(v));
        if let (Some(lo), Some(hi)) = (min_w, max_w) {
            if lo > hi {
                min_w = None;
                max_w = None;
            }
        }
        let mut min_h = coerce_int(obj.get("minH")).filter(|v| *v >= 1);
        let mut max_h = coerce_int(obj.get("maxH")).filter(|v| *v >= 1);
        if let (Some(lo), Some(hi)) = (min_h, max_h) {
            if lo > hi {
                min_h = None;
                max_h = None;
            }
        }

        let w = coerce_int(obj.get("w"))
            .unwrap_or(i64::from(default_w))
            .clamp(min_w.unwrap_or(1), max_w.unwrap_or(COLUMNS));
        let x = coerce_int(obj.get("x"))
            .unwrap_or(0)
            .clamp(0, COLUMNS - 1)
            .min(COLUMNS - w);
        let y = coerce_int(obj.get("y")).unwrap_or(0).max(0);
        let mut h = coerce_int(obj.get("h"))
            .unwrap_or(i64::from(default_h))
            .max(min_h.unwrap_or(1));
        if let Some(hi) = max_h {
            h = h.min(hi);
        }

        Some(Widget {
            id: id.to_string(),
            widget_type,
            size,
            x: to_u32(x),
            y: to_u32(y),
            w: to_u32(w),
            h: to_u32(h),
            is_static: obj.get("static").and_then(Value::as_bool),
            min_w: min_w.map(to_u32),
            max_w: max_w.map(to_u32),
            min_h: min_h.map(to_u32),
            max_h: max_h.map(to_u32),
            updated_at: obj
                .get("updatedAt")
                .and_then(|v| serde_json::from_value::<DateTime<Utc>>(v.clone()).ok()),
        })
    }

    /// Sanitizes a collection; duplicate ids keep their first occurrence.
    pub fn sanitize_layout(&self, candidates: &[Value]) -> Vec<Widget> {
        let mut seen = HashSet::new();
        candidates
            .iter()
            .filter_map(|c| self.sanitize_widget(c))
            .filter(|w| seen.insert(w.id.clone()))
            .collect()
    }

    pub fn sanitize_widgets(&self, widgets: &[Widget]) -> Vec<Widget> {
        self.sanitize_layout(&to_values(widgets))
    }

    fn check_type(
        &self,
        obj: &Map<String, Value>,
        id: Option<&str>,
        report: &mut ValidationReport,
    ) -> Option<WidgetType> {
        match obj.get("type") {
            None | Some(Value::Null) => {
                report.push(id, "type", "Widget type is required".into(), Severity::Critical);
                None
            }
            Some(Value::String(s)) => match s.parse::<WidgetType>() {
                Ok(t) => {
                    if self.registry.get(t).is_none() {
                        report.warn(id, "type", format!("No configuration registered for widget type '{}'", t));
                    }
                    Some(t)
                }
                Err(_) => {
                    report.push(id, "type", format!("Unknown widget type '{}'", s), Severity::Critical);
                    None
                }
            },
            Some(_) => {
                report.push(id, "type", "Widget type must be a string".into(), Severity::Critical);
                None
            }
        }
    }

    fn check_size(
        &self,
        obj: &Map<String, Value>,
        id: Option<&str>,
        widget_type: Option<WidgetType>,
        report: &mut ValidationReport,
    ) {
        let size = match obj.get("size") {
            None | Some(Value::Null) => return,
            Some(Value::String(s)) => match s.parse::<WidgetSize>() {
                Ok(size) => size,
                Err(_) => {
                    report.push(id, "size", format!("Unknown widget size '{}'", s), Severity::Error);
                    return;
                }
            },
            Some(_) => {
                report.push(id, "size", "Widget size must be a string".into(), Severity::Error);
                return;
            }
        };

        let spec = widget_type.and_then(|t| self.registry.get(t).map(|spec| (t, spec)));
        if let Some((t, spec)) = spec {
            if !spec.allows(size) {
                report.push(
                    id,
                    "size",
                    format!("Size '{}' is not allowed for widget type '{}'", size, t),
                    Severity::Error,
                );
            }
        }
    }
}

fn check_constraints(
    obj: &Map<String, Value>,
    id: Option<&str>,
    w: Option<i64>,
    h: Option<i64>,
    report: &mut ValidationReport,
) {
    let mut read = |field: &str| -> Option<i64> {
        let value = obj.get(field)?;
        match value.as_i64().filter(|v| *v >= 1) {
            Some(v) => Some(v),
            None => {
                report.push(id, field, format!("{} must be a positive integer", field), Severity::Error);
                None
            }
        }
    };
    let (min_w, max_w, min_h, max_h) = (read("minW"), read("maxW"), read("minH"), read("maxH"));

    for (dim, value, lo, hi) in [("w", w, min_w, max_w), ("h", h, min_h, max_h)] {
        if let (Some(lo), Some(hi)) = (lo, hi) {
            if lo > hi {
                report.push(id, dim, format!("min{0} must not exceed max{0}", dim.to_uppercase()), Severity::Error);
                continue;
            }
        }
        let Some(value) = value else { continue };
        if lo.is_some_and(|lo| value < lo) || hi.is_some_and(|hi| value > hi) {
            report.push(id, dim, format!("{} of {} is outside its min/max constraints", dim, value), Severity::Error);
        }
    }
}

fn to_values(widgets: &[Widget]) -> Vec<Value> {
    widgets
        .iter()
        .map(|w| serde_json::to_value(w).unwrap_or_default())
        .collect()
}

/// Reads an integer from a JSON number or numeric string; floats truncate.
fn coerce_int(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite())
                    .map(|f| f.trunc() as i64)
            })
        }
        _ => None,
    }
}

fn to_u32(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use serde_json::json;

    fn validator() -> LayoutValidator {
        LayoutValidator::builtin()
    }

    fn valid_widget() -> Value {
        json!({"id": "w1", "type": "chart", "size": "medium", "x": 0, "y": 0, "w": 4, "h": 3})
    }

    #[test]
    fn test_valid_widget_passes_cleanly() {
        let report = validator().validate_widget(&valid_widget());
        assert!(report.valid);
        assert!(report.errors.is_empty());
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_missing_required_fields_are_critical() {
        let report = validator().validate_widget(&json!({"type": "chart", "x": 0}));
        assert!(!report.valid);
        let fields: Vec<&str> = report.critical().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["id", "y", "w", "h"]);
    }

    #[test]
    fn test_non_object_is_critical() {
        let report = validator().validate_widget(&json!("widget"));
        assert!(!report.valid);
        assert_eq!(report.errors[0].field, "widget");
    }

    #[test]
    fn test_unknown_type_is_critical() {
        let mut widget = valid_widget();
        widget["type"] = json!("sparkline");
        let report = validator().validate_widget(&widget);
        assert!(!report.valid);
        assert!(report.summary().contains("sparkline"));
    }

    #[test]
    fn test_unregistered_type_only_warns() {
        let report = validator()
            .validate_widget(&json!({"id": "l", "type": "links", "x": 0, "y": 0, "w": 2, "h": 2}));
        assert!(report.valid);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].field, "type");
    }

    #[test]
    fn test_disallowed_size_is_non_fatal_error() {
        let mut widget = valid_widget();
        widget["type"] = json!("clock");
        widget["size"] = json!("large");
        let report = validator().validate_widget(&widget);
        assert!(report.valid);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].severity, Severity::Error);
    }

    #[test]
    fn test_position_errors_are_critical_dimension_errors_are_not() {
        let report = validator()
            .validate_widget(&json!({"id": "a", "type": "chart", "x": 12, "y": -1, "w": 4, "h": 2}));
        assert!(!report.valid);
        assert_eq!(report.critical().count(), 2);

        let report = validator()
            .validate_widget(&json!({"id": "a", "type": "chart", "x": 10, "y": 0, "w": 4, "h": 0}));
        assert!(report.valid);
        let fields: Vec<&str> = report.errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["w", "h"]);
    }

    #[test]
    fn test_extreme_coordinates_are_reported_not_panicked_on() {
        let report = validator()
            .validate_widget(&json!({"id": "a", "type": "chart", "x": i64::MAX, "y": 0, "w": 1, "h": 1}));
        assert!(!report.valid);
        assert!(report.critical().any(|e| e.field == "x"));
        assert!(report.errors.iter().any(|e| e.field == "w"));

        let report = validator()
            .validate_widget(&json!({"id": "a", "type": "chart", "x": 11, "y": 0, "w": i64::MAX, "h": 1}));
        assert!(report.valid);
        assert!(report.errors.iter().all(|e| e.field == "w"));

        let report = validator()
            .validate_widget(&json!({"id": "a", "type": "chart", "x": i64::MIN, "y": i64::MIN, "w": i64::MIN, "h": i64::MIN}));
        assert!(!report.valid);

        let widget = validator()
            .sanitize_widget(&json!({"id": "a", "type": "chart", "x": i64::MAX, "y": i64::MAX, "w": i64::MIN, "h": i64::MAX}))
            .unwrap();
        assert!(widget.fits_grid());
        assert_eq!((widget.x, widget.w), (11, 1));
    }

    #[test]
    fn test_excessive_height_warns() {
        let mut widget = valid_widget();
        widget["h"] = json!(40);
        let report = validator().validate_widget(&widget);
        assert!(report.valid);
        assert!(report.errors.is_empty());
        assert_eq!(report.warnings[0].field, "h");
    }

    #[test]
    fn test_min_max_constraints() {
        let mut widget = valid_widget();
        widget["minW"] = json!(6);
        widget["maxH"] = json!(0);
        let report = validator().validate_widget(&widget);
        assert!(report.valid);
        let messages: Vec<String> = report.errors.iter().map(|e| e.to_string()).collect();
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().any(|m| m.contains("maxH")));
        assert!(messages.iter().any(|m| m.contains("min/max")));
    }

    #[test]
    fn test_duplicate_ids_are_critical() {
        let report = validator().validate_layout(&[valid_widget(), valid_widget()]);
        assert!(!report.valid);
        assert!(report.summary().contains("Duplicate widget id 'w1'"));
    }

    #[test]
    fn test_sanitize_clamps_and_defaults() {
        let widget = validator()
            .sanitize_widget(&json!({"id": "a", "x": 11, "y": -3, "w": 20, "h": "0"}))
            .unwrap();
        assert_eq!(widget.widget_type, WidgetType::Metrics);
        assert_eq!(widget.size, Some(WidgetSize::Small));
        assert_eq!((widget.x, widget.y, widget.w, widget.h), (0, 0, 12, 1));
    }

    #[test]
    fn test_sanitize_shifts_overflowing_widget_left() {
        let widget = validator()
            .sanitize_widget(&json!({"id": "a", "type": "chart", "x": 10, "y": 1.7, "w": 4, "h": 2}))
            .unwrap();
        assert_eq!((widget.x, widget.y, widget.w), (8, 1, 4));
    }

    #[test]
    fn test_sanitize_replaces_disallowed_size() {
        let widget = validator()
            .sanitize_widget(&json!({"id": "c", "type": "clock", "size": "full", "x": 0, "y": 0, "w": 2, "h": 2}))
            .unwrap();
        assert_eq!(widget.size, Some(WidgetSize::Small));
    }

    #[test]
    fn test_sanitize_drops_hard_failures() {
        let v = validator();
        assert!(v.sanitize_widget(&json!(null)).is_none());
        assert!(v.sanitize_widget(&json!({"type": "chart"})).is_none());
        assert!(v.sanitize_widget(&json!({"id": "", "type": "chart"})).is_none());
        assert!(v.sanitize_widget(&json!({"id": "a", "type": "sparkline"})).is_none());
        assert!(v.sanitize_widget(&json!({"id": "a", "type": 3})).is_none());
    }

    #[test]
    fn test_sanitize_layout_dedupes() {
        let widgets = validator().sanitize_layout(&[
            json!({"id": "a", "type": "chart", "x": 0, "y": 0, "w": 4, "h": 2}),
            json!({"id": "a", "type": "notes", "x": 4, "y": 0, "w": 4, "h": 2}),
            json!({"id": "b", "type": "notes"}),
        ]);
        assert_eq!(widgets.len(), 2);
        assert_eq!(widgets[0].widget_type, WidgetType::Chart);
    }

    fn random_value(rng: &mut StdRng) -> Value {
        match rng.random_range(0..8) {
            0 => Value::Null,
            1 => json!(rng.random_range(-50..50)),
            2 => json!(rng.random_range(-50.0..50.0)),
            3 => json!(rng.random_range(-20..40).to_string()),
            4 => json!("garbage"),
            5 => json!(true),
            6 => json!([1, 2]),
            _ => json!(rng.random_range(0..13)),
        }
    }

    fn random_candidate(rng: &mut StdRng) -> Value {
        let mut obj = Map::new();
        if rng.random_bool(0.9) {
            obj.insert("id".into(), json!(format!("w{}", rng.random_range(0..6))));
        }
        if rng.random_bool(0.8) {
            let types = ["chart", "clock", "links", "tasks", "bogus"];
            obj.insert("type".into(), json!(types[rng.random_range(0..types.len())]));
        }
        if rng.random_bool(0.5) {
            let sizes = ["small", "medium", "large", "wide", "full", "huge"];
            obj.insert("size".into(), json!(sizes[rng.random_range(0..sizes.len())]));
        }
        for field in ["x", "y", "w", "h", "minW", "maxW", "minH", "maxH", "static"] {
            if rng.random_bool(0.6) {
                obj.insert(field.into(), random_value(rng));
            }
        }
        Value::Object(obj)
    }

    #[test]
    fn test_sanitized_output_is_always_legal_and_idempotent() {
        let v = validator();
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..300 {
            let candidates: Vec<Value> = (0..rng.random_range(0..8))
                .map(|_| random_candidate(&mut rng))
                .collect();

            let sanitized = v.sanitize_layout(&candidates);
            for widget in &sanitized {
                assert!(widget.fits_grid(), "illegal widget {:?}", widget);
            }

            let report = v.validate_widgets(&sanitized);
            assert!(report.valid, "{:?}", report.errors);
            assert!(report.errors.is_empty(), "{:?}", report.errors);

            assert_eq!(v.sanitize_widgets(&sanitized), sanitized);
        }
    }
}
