use clap::{Args, Subcommand};

use super::layout::OutputFormat;
use crate::engine::Engine;

#[derive(Args)]
pub struct QueueCommand {
    #[command(subcommand)]
    pub command: QueueSubcommand,
}

#[derive(Subcommand)]
pub enum QueueSubcommand {
    /// List saves waiting for the server
    List {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Drop every queued save
    Clear {
        /// Skip confirmation prompt
        #[arg(long, short)]
        force: bool,
    },
}

impl QueueCommand {
    pub fn run(&self, engine: &Engine) -> Result<(), Box<dyn std::error::Error>> {
        let queue = &engine.context().queue;
        match &self.command {
            QueueSubcommand::List { format } => {
                let entries = queue.get_all();
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&entries)?);
                    }
                    OutputFormat::Text => {
                        println!("Offline queue ({}/{})", entries.len(), queue.capacity());
                        println!();
                        if entries.is_empty() {
                            println!("Nothing queued.");
                        }
                        for entry in &entries {
                            let request = &entry.request;
                            println!(
                                "  {}  {}  {} widget{}  priority {}",
                                request.created_at.format("%Y-%m-%d %H:%M:%S%.3f"),
                                request.user_id,
                                request.layout.widget_count(),
                                if request.layout.widget_count() == 1 { "" } else { "s" },
                                request.priority
                            );
                        }
                    }
                }
                Ok(())
            }
            QueueSubcommand::Clear { force } => {
                let count = queue.len();
                if count == 0 {
                    println!("Nothing queued.");
                    return Ok(());
                }
                if !force && !confirm(&format!("Drop {} queued save(s)?", count))? {
                    println!("Cancelled.");
                    return Ok(());
                }
                queue.clear();
                println!("Dropped {} queued save(s).", count);
                Ok(())
            }
        }
    }
}

fn confirm(prompt: &str) -> std::io::Result<bool> {
    use std::io::Write;

    print!("{} [y/N] ", prompt);
    std::io::stdout().flush()?;
    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(matches!(input.trim().to_lowercase().as_str(), "y" | "yes"))
}
