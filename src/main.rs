use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;
mod engine;
mod remote;

use commands::{ConfigCommand, HistoryCommand, LayoutCommand, QueueCommand, SyncCommand};
use config::Config;
use engine::Engine;

#[derive(Parser)]
#[command(name = "dashsync")]
#[command(version)]
#[command(about = "Dashboard layout persistence and sync", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// View and edit the dashboard layout
    Layout(LayoutCommand),

    /// Browse, compare and restore layout versions
    History(HistoryCommand),

    /// Sync with remote server
    Sync(SyncCommand),

    /// Inspect the offline queue
    Queue(QueueCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dashsync=warn,dash_sync_core=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Load configuration
    let config = Config::load(cli.config)?;

    let command = match cli.command {
        Some(Commands::Config(cmd)) => return cmd.run(&config),
        Some(command) => command,
        None => {
            println!("Use --help to see available commands");
            return Ok(());
        }
    };

    let engine = Engine::open(&config).await?;
    let result = match command {
        Commands::Layout(cmd) => cmd.run(&engine).await,
        Commands::History(cmd) => cmd.run(&engine).await,
        Commands::Sync(cmd) => cmd.run(&engine).await,
        Commands::Queue(cmd) => cmd.run(&engine),
        Commands::Config(_) => Ok(()),
    };
    engine.close().await;

    result
}
