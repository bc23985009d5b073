//! Main entry point for the wiki-ingest CLI

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;
use wiki_ingest::cli::{self, Cli, Commands};
use wiki_ingest::shutdown::{self, ShutdownCoordinator};

/// Initialize tracing subscriber; `LOG_FORMAT=json` switches to JSON lines
fn init_tracing() {
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("wiki_ingest=info"));

    if json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();

    // Ctrl+C stops leasing new work; in-flight chunks finish and state is saved
    let shutdown = ShutdownCoordinator::shared();
    shutdown::set_global_shutdown(shutdown.clone());
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Ctrl+C received - finishing in-flight work and saving progress...");
                shutdown.request_shutdown();
            }
        }
    });

    let result = match &cli.command {
        Commands::Run(args) => args
            .execute(&cli, shutdown.clone())
            .await
            .map_err(|e| anyhow::anyhow!(e)),
        Commands::Status => cli::status::execute(&cli)
            .await
            .map_err(|e| anyhow::anyhow!(e)),
        Commands::Reset(args) => args.execute(&cli).await.map_err(|e| anyhow::anyhow!(e)),
        Commands::RequeueFailed => cli::maintenance::execute_requeue(&cli)
            .await
            .map_err(|e| anyhow::anyhow!(e)),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        std::process::exit(1);
    }
}
