use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use threadsmith::config::AppConfig;
use threadsmith::server::{ServerConfig, start_server};

#[derive(Parser)]
#[command(name = "threadsmith")]
#[command(version, about = "Feedback-to-shipping pipeline - turn community threads into tickets and PRs")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP trigger interface for the external scheduler
    Serve {
        #[arg(long, default_value = "8000")]
        port: u16,

        /// Path to the SQLite database
        #[arg(long)]
        db: Option<PathBuf>,

        /// Bind on all interfaces and allow permissive CORS
        #[arg(long)]
        dev: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let default_filter = if cli.verbose { "threadsmith=debug,info" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let app_config = AppConfig::from_env();

    match cli.command.unwrap_or(Commands::Serve {
        port: 8000,
        db: None,
        dev: false,
    }) {
        Commands::Serve { port, db, dev } => {
            let defaults = ServerConfig::default();
            let server = ServerConfig {
                port,
                db_path: db.unwrap_or(defaults.db_path),
                dev_mode: dev,
            };
            start_server(server, app_config).await
        }
    }
}
