use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WidgetType {
    #[default]
    Metrics,
    Chart,
    Activity,
    Tasks,
    Calendar,
    Notes,
    Weather,
    Clock,
    News,
    Links,
}

impl WidgetType {
    pub const ALL: [WidgetType; 10] = [
        WidgetType::Metrics,
        WidgetType::Chart,
        WidgetType::Activity,
        WidgetType::Tasks,
        WidgetType::Calendar,
        WidgetType::Notes,
        WidgetType::Weather,
        WidgetType::Clock,
        WidgetType::News,
        WidgetType::Links,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WidgetType::Metrics => "metrics",
            WidgetType::Chart => "chart",
            WidgetType::Activity => "activity",
            WidgetType::Tasks => "tasks",
            WidgetType::Calendar => "calendar",
            WidgetType::Notes => "notes",
            WidgetType::Weather => "weather",
            WidgetType::Clock => "clock",
            WidgetType::News => "news",
            WidgetType::Links => "links",
        }
    }
}

impl fmt::Display for WidgetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for WidgetType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_lowercase();
        WidgetType::ALL
            .into_iter()
            .find(|t| t.as_str() == lower)
            .ok_or_else(|| {
                let valid: Vec<&str> = WidgetType::ALL.iter().map(|t| t.as_str()).collect();
                format!(
                    "Invalid widget type '{}'. Valid options: {}",
                    s,
                    valid.join(", ")
                )
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WidgetSize {
    Small,
    Medium,
    Large,
    Wide,
    Full,
}

impl WidgetSize {
    pub const ALL: [WidgetSize; 5] = [
        WidgetSize::Small,
        WidgetSize::Medium,
        WidgetSize::Large,
        WidgetSize::Wide,
        WidgetSize::Full,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WidgetSize::Small => "small",
            WidgetSize::Medium => "medium",
            WidgetSize::Large => "large",
            WidgetSize::Wide => "wide",
            WidgetSize::Full => "full",
        }
    }

    /// Default grid footprint `(w, h)` for a widget of this size.
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            WidgetSize::Small => (3, 2),
            WidgetSize::Medium => (4, 3),
            WidgetSize::Large => (6, 4),
            WidgetSize::Wide => (8, 3),
            WidgetSize::Full => (12, 4),
        }
    }
}

impl fmt::Display for WidgetSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for WidgetSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "small" => Ok(WidgetSize::Small),
            "medium" => Ok(WidgetSize::Medium),
            "large" => Ok(WidgetSize::Large),
            "wide" => Ok(WidgetSize::Wide),
            "full" => Ok(WidgetSize::Full),
            _ => Err(format!(
                "Invalid widget size '{}'. Valid options: small, medium, large, wide, full",
                s
            )),
        }
    }
}
