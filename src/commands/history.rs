use clap::{Args, Subcommand};

use dash_sync_core::{compare_versions, Layout, LayoutVersion};

use super::layout::OutputFormat;
use crate::engine::Engine;

#[derive(Args)]
pub struct HistoryCommand {
    #[command(subcommand)]
    pub command: HistorySubcommand,
}

#[derive(Subcommand)]
pub enum HistorySubcommand {
    /// List recorded versions, most recent first
    List {
        /// Maximum number of versions to show
        #[arg(long, short)]
        limit: Option<usize>,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show widget changes between two versions
    Diff {
        /// Older version number
        from: u64,

        /// Newer version number
        to: u64,
    },

    /// Restore the widgets of an earlier version as a new version
    Rollback {
        /// Version number to restore
        version: u64,
    },
}

impl HistoryCommand {
    pub async fn run(&self, engine: &Engine) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            HistorySubcommand::List { limit, format } => {
                let versions = engine.manager.get_version_history(&engine.user_id, *limit)?;
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&versions)?);
                    }
                    OutputFormat::Text => {
                        if versions.is_empty() {
                            println!("No versions recorded.");
                        }
                        for version in &versions {
                            println!("{}", version);
                        }
                    }
                }
                Ok(())
            }
            HistorySubcommand::Diff { from, to } => {
                let versions = &engine.context().versions;
                let older = versions
                    .get_version(&engine.user_id, *from)?
                    .ok_or_else(|| format!("Version not found: {}", from))?;
                let newer = versions
                    .get_version(&engine.user_id, *to)?
                    .ok_or_else(|| format!("Version not found: {}", to))?;

                let changes = compare_versions(&snapshot(&older), &snapshot(&newer));
                println!("v{} -> v{}", from, to);
                if changes.is_empty() {
                    println!("No changes.");
                }
                for change in &changes {
                    println!("  {}", change);
                }
                Ok(())
            }
            HistorySubcommand::Rollback { version } => {
                let report = engine
                    .manager
                    .rollback_to_version(&engine.user_id, *version)
                    .await?;
                println!("{}", report.notice());
                if report.is_rejected() {
                    return Err(format!("rollback to version {} was rejected", version).into());
                }
                Ok(())
            }
        }
    }
}

fn snapshot(version: &LayoutVersion) -> Layout {
    Layout::new()
        .with_desktop(version.desktop.clone())
        .with_mobile(version.mobile.clone())
        .with_version(version.version)
}
