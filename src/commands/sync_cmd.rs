//! Sync CLI commands for reconciling with the server.

use clap::{Args, Subcommand};

use dash_sync_core::{SaveStatus, SyncAction, SyncReport};

use crate::engine::Engine;

/// Sync with remote server
#[derive(Debug, Args)]
pub struct SyncCommand {
    #[command(subcommand)]
    command: Option<SyncSubcommand>,
}

#[derive(Debug, Subcommand)]
enum SyncSubcommand {
    /// Show sync configuration and server status
    Status,
}

impl SyncCommand {
    pub async fn run(&self, engine: &Engine) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            None => self.sync(engine).await,
            Some(SyncSubcommand::Status) => {
                self.status(engine);
                Ok(())
            }
        }
    }

    async fn sync(&self, engine: &Engine) -> Result<(), Box<dyn std::error::Error>> {
        if engine.server_url.is_none() {
            println!("Sync is not configured; see `dashsync sync status`.");
            return Ok(());
        }

        println!("Syncing with server...");
        println!();

        let report = engine.manager.sync(&engine.user_id).await;
        for line in describe(&report) {
            println!("  {}", line);
        }
        println!();

        match report.action {
            SyncAction::Failed(message) => Err(message.into()),
            _ if !report.online => {
                println!("Server unreachable; changes stay queued.");
                Ok(())
            }
            SyncAction::InSync | SyncAction::Nothing => {
                println!("Already up to date.");
                Ok(())
            }
            _ => {
                println!("Sync complete.");
                Ok(())
            }
        }
    }

    fn status(&self, engine: &Engine) {
        println!("Sync Configuration");
        println!("==================");
        println!();

        let Some(server_url) = &engine.server_url else {
            println!("Status: Not configured");
            println!();
            println!("To enable sync, add to your config file:");
            println!();
            println!("  server_url: \"http://localhost:8080\"");
            println!();
            println!("Or set environment variables:");
            println!("  DASHSYNC_SERVER_URL");
            return;
        };

        let ctx = engine.context();
        println!("Server:    {}", server_url);
        println!("Device:    {}", ctx.device_id);
        println!("Queued:    {}", ctx.queue.len());
        println!(
            "Server status: {}",
            if ctx.is_online() {
                "✓ connected"
            } else {
                "✗ unreachable"
            }
        );
    }
}

/// Human-readable lines for a sync pass.
fn describe(report: &SyncReport) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(replay) = &report.replay {
        if replay.replayed > 0 || replay.remaining > 0 {
            lines.push(format!(
                "✓ replayed {} queued save{} ({} remaining)",
                replay.replayed,
                if replay.replayed == 1 { "" } else { "s" },
                replay.remaining
            ));
        }
        if let Some(reason) = &replay.stopped {
            lines.push(format!("✗ replay stopped: {}", reason));
        }
    }
    lines.push(match &report.action {
        SyncAction::Pushed(SaveStatus::Saved { version }) => {
            format!("✓ pushed local layout as v{}", version)
        }
        SyncAction::Pushed(SaveStatus::Failed(message)) => format!("✗ push failed: {}", message),
        SyncAction::Pushed(_) => "✗ local layout kept on this device".to_string(),
        SyncAction::Pulled { version } => format!("✓ pulled layout v{} from server", version),
        SyncAction::InSync => "✓ up to date".to_string(),
        SyncAction::Nothing => "✓ nothing to sync".to_string(),
        SyncAction::Failed(message) => format!("✗ error: {}", message),
    });
    lines
}
