use clap::{Args, Subcommand, ValueEnum};
use serde_json::Value;
use std::path::{Path, PathBuf};

use dash_sync_core::{
    Breakpoint, ChangeType, Layout, LayoutValidator, OptimisticChange, SaveOptions, SaveReport,
    SaveStatus, UpdateCallbacks, ValidationReport, Widget, WidgetSize, WidgetType,
};

use crate::engine::Engine;

#[derive(Clone, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Args)]
pub struct LayoutCommand {
    #[command(subcommand)]
    pub command: LayoutSubcommand,
}

#[derive(Subcommand)]
pub enum LayoutSubcommand {
    /// Show the current layout
    Show {
        /// Show the mobile collection instead of desktop
        #[arg(long)]
        mobile: bool,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Add a widget
    Add {
        /// Widget ID
        id: String,

        /// Widget type (metrics, chart, activity, tasks, calendar, notes, weather, clock, news, links)
        #[arg(long = "type", value_name = "TYPE")]
        widget_type: WidgetType,

        /// Size preset (small, medium, large, wide, full)
        #[arg(long)]
        size: Option<WidgetSize>,

        #[arg(long, default_value = "0")]
        x: u32,

        #[arg(long, default_value = "0")]
        y: u32,

        /// Width in grid columns (defaults to the size preset)
        #[arg(long)]
        w: Option<u32>,

        /// Height in grid rows (defaults to the size preset)
        #[arg(long)]
        h: Option<u32>,

        /// Edit the mobile collection
        #[arg(long)]
        mobile: bool,
    },

    /// Move a widget
    Move {
        /// Widget ID
        id: String,

        #[arg(long)]
        x: u32,

        #[arg(long)]
        y: u32,

        /// Edit the mobile collection
        #[arg(long)]
        mobile: bool,
    },

    /// Resize a widget
    Resize {
        /// Widget ID
        id: String,

        #[arg(long)]
        w: u32,

        #[arg(long)]
        h: u32,

        /// Edit the mobile collection
        #[arg(long)]
        mobile: bool,
    },

    /// Remove a widget
    Remove {
        /// Widget ID
        id: String,

        /// Edit the mobile collection
        #[arg(long)]
        mobile: bool,
    },

    /// Replace the layout with one read from a JSON file
    Import {
        /// File containing `{"desktop": [...], "mobile": [...]}`
        file: PathBuf,
    },

    /// Validate a layout JSON file without saving it
    Validate {
        /// File containing `{"desktop": [...], "mobile": [...]}`
        file: PathBuf,
    },
}

/// A single edit applied to one widget collection.
#[derive(Debug, Clone, PartialEq)]
pub enum Edit {
    Add(Widget),
    Move { id: String, x: u32, y: u32 },
    Resize { id: String, w: u32, h: u32 },
    Remove { id: String },
}

impl Edit {
    pub fn describe(&self, breakpoint: Breakpoint) -> String {
        match self {
            Edit::Add(widget) => format!("Added {} widget '{}' ({})", widget.widget_type, widget.id, breakpoint),
            Edit::Move { id, x, y } => format!("Moved '{}' to ({}, {}) ({})", id, x, y, breakpoint),
            Edit::Resize { id, w, h } => format!("Resized '{}' to {}x{} ({})", id, w, h, breakpoint),
            Edit::Remove { id } => format!("Removed '{}' ({})", id, breakpoint),
        }
    }

    /// Applies the edit to `layout`, failing on unknown or duplicate ids.
    pub fn apply(&self, layout: &mut Layout, breakpoint: Breakpoint) -> Result<(), String> {
        let widgets = layout.widgets_mut(breakpoint);

        match self {
            Edit::Add(widget) => {
                if widgets.iter().any(|w| w.id == widget.id) {
                    return Err(format!("Widget '{}' already exists", widget.id));
                }
                widgets.push(widget.clone());
            }
            Edit::Move { id, x, y } => {
                let index = position(widgets, id)?;
                widgets[index].x = *x;
                widgets[index].y = *y;
            }
            Edit::Resize { id, w, h } => {
                let index = position(widgets, id)?;
                widgets[index].w = *w;
                widgets[index].h = *h;
            }
            Edit::Remove { id } => {
                let index = position(widgets, id)?;
                widgets.remove(index);
            }
        }
        Ok(())
    }
}

fn position(widgets: &[Widget], id: &str) -> Result<usize, String> {
    widgets
        .iter()
        .position(|w| w.id == id)
        .ok_or_else(|| format!("Widget not found: {}", id))
}

fn breakpoint(mobile: bool) -> Breakpoint {
    if mobile {
        Breakpoint::Mobile
    } else {
        Breakpoint::Desktop
    }
}

impl LayoutCommand {
    pub async fn run(&self, engine: &Engine) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            LayoutSubcommand::Show { mobile, format } => {
                let layout = current_layout(engine).await;
                show(&layout, breakpoint(*mobile), format)
            }
            LayoutSubcommand::Add {
                id,
                widget_type,
                size,
                x,
                y,
                w,
                h,
                mobile,
            } => {
                let mut widget = Widget::new(id.clone(), *widget_type).at(*x, *y);
                if let Some(size) = size {
                    widget = widget.with_size(*size);
                }
                let (default_w, default_h) = size.map(|s| s.dimensions()).unwrap_or((widget.w, widget.h));
                widget = widget.with_dimensions(w.unwrap_or(default_w), h.unwrap_or(default_h));
                edit(engine, Edit::Add(widget), breakpoint(*mobile)).await
            }
            LayoutSubcommand::Move { id, x, y, mobile } => {
                let change = Edit::Move {
                    id: id.clone(),
                    x: *x,
                    y: *y,
                };
                edit(engine, change, breakpoint(*mobile)).await
            }
            LayoutSubcommand::Resize { id, w, h, mobile } => {
                let change = Edit::Resize {
                    id: id.clone(),
                    w: *w,
                    h: *h,
                };
                edit(engine, change, breakpoint(*mobile)).await
            }
            LayoutSubcommand::Remove { id, mobile } => {
                edit(engine, Edit::Remove { id: id.clone() }, breakpoint(*mobile)).await
            }
            LayoutSubcommand::Import { file } => import(engine, file).await,
            LayoutSubcommand::Validate { file } => {
                let raw = read_layout_file(file)?;
                let validator = &engine.context().validator;
                let mut failed = false;
                for bp in Breakpoint::ALL {
                    let report = validate_raw(validator, &raw, bp);
                    print_report(bp, &report);
                    failed |= !report.valid;
                }
                if failed {
                    return Err("layout has critical problems".into());
                }
                Ok(())
            }
        }
    }
}

/// The stored layout, or an empty one for a new user.
async fn current_layout(engine: &Engine) -> Layout {
    match engine.manager.load_layout(&engine.user_id).await {
        Some(outcome) => {
            tracing::debug!(source = %outcome.source, "loaded layout");
            outcome.layout
        }
        None => Layout::new(),
    }
}

fn show(layout: &Layout, bp: Breakpoint, format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let widgets = layout.widgets(bp);
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(widgets)?);
        }
        OutputFormat::Text => {
            println!(
                "Layout v{} ({}, {} widget{})",
                layout.version,
                bp,
                widgets.len(),
                if widgets.len() == 1 { "" } else { "s" }
            );
            if let Some(device) = &layout.device_id {
                println!(
                    "Last saved {} from {}",
                    layout.updated_at.format("%Y-%m-%d %H:%M:%S"),
                    device
                );
            }
            println!();
            if widgets.is_empty() {
                println!("No widgets.");
            }
            for widget in widgets {
                println!("  {}", widget);
            }
        }
    }
    Ok(())
}

/// Applies an edit, shows it, and confirms it with an immediate save. A
/// rejected or failed save rolls the preview back.
async fn edit(engine: &Engine, change: Edit, bp: Breakpoint) -> Result<(), Box<dyn std::error::Error>> {
    let mut layout = current_layout(engine).await;
    change.apply(&mut layout, bp)?;

    let description = change.describe(bp);
    println!("{}", description);

    let optimistic = &engine.context().optimistic;
    let rollback_note = description.clone();
    let pending = OptimisticChange::new(description.clone())
        .with_rollback(move || eprintln!("Reverted: {}", rollback_note));
    let callbacks = UpdateCallbacks::new().with_messages("layout change confirmed", "layout change rolled back");

    let report = optimistic
        .execute(save(engine, layout, description), pending, callbacks)
        .await?;
    println!("{}", report.notice());
    Ok(())
}

async fn import(engine: &Engine, file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let raw = read_layout_file(file)?;
    let validator = &engine.context().validator;

    let mut layout = current_layout(engine).await;
    for bp in Breakpoint::ALL {
        let report = validate_raw(validator, &raw, bp);
        if !report.valid {
            print_report(bp, &report);
            return Err(format!("Layout rejected: {}", report.summary()).into());
        }
        *layout.widgets_mut(bp) = validator.sanitize_layout(raw_widgets(&raw, bp));
    }

    let description = format!("Imported from {}", file.display());
    let report = save(engine, layout, description).await?;
    println!("{}", report.notice());
    Ok(())
}

/// Saves immediately; rejection and failure become errors.
async fn save(engine: &Engine, layout: Layout, description: String) -> Result<SaveReport, String> {
    let options = SaveOptions::immediate()
        .with_description(description)
        .with_change_type(ChangeType::Manual);
    let report = engine.manager.save_layout(&engine.user_id, layout, options).await;

    for warning in &report.warnings {
        eprintln!("Warning: {}", warning);
    }
    match &report.status {
        SaveStatus::Rejected(_) | SaveStatus::Failed(_) => Err(report.notice()),
        _ => Ok(report),
    }
}

fn read_layout_file(file: &Path) -> Result<Value, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(file)
        .map_err(|e| format!("Failed to read '{}': {}", file.display(), e))?;
    let raw: Value = serde_json::from_str(&contents)
        .map_err(|e| format!("Failed to parse '{}': {}", file.display(), e))?;
    if !raw.is_object() {
        return Err(format!("'{}' must contain a JSON object", file.display()).into());
    }
    Ok(raw)
}

fn raw_widgets(raw: &Value, bp: Breakpoint) -> &[Value] {
    raw.get(bp.to_string())
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn validate_raw(validator: &LayoutValidator, raw: &Value, bp: Breakpoint) -> ValidationReport {
    validator.validate_layout(raw_widgets(raw, bp))
}

fn print_report(bp: Breakpoint, report: &ValidationReport) {
    let status = if report.valid { "✓ valid" } else { "✗ invalid" };
    println!("{}: {}", bp, status);
    for issue in &report.errors {
        println!("  [{}] {}", issue.severity, issue);
    }
    for warning in &report.warnings {
        println!("  [warning] {}", warning);
    }
}
