//! Main entry point for the ieeg-bids-downloader CLI

use clap::Parser;
use ieeg_bids_downloader::cli::{Cli, Commands};
use ieeg_bids_downloader::shutdown::{self, ShutdownCoordinator};
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber with optional JSON formatting
fn init_tracing() {
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("ieeg_bids_downloader=info"));

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

    // Install global shutdown coordinator and Ctrl+C handler
    let shutdown = ShutdownCoordinator::shared();
    shutdown::set_global_shutdown(shutdown.clone());
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Ctrl+C received - finishing current recording and stopping...");
                shutdown.request_shutdown();
            }
        }
    });

    let result: anyhow::Result<()> = match &cli.command {
        Commands::Download(args) => args
            .execute(cli.output_format, shutdown.clone())
            .await
            .map(|summary| {
                if summary.failed > 0 {
                    tracing::warn!(failed = summary.failed, "Some recordings failed");
                }
            })
            .map_err(|e| anyhow::anyhow!(e)),
        Commands::Import(args) => args
            .execute(cli.output_format, shutdown.clone())
            .await
            .map(|summary| {
                if summary.failed > 0 {
                    tracing::warn!(failed = summary.failed, "Some files failed to import");
                }
            })
            .map_err(|e| anyhow::anyhow!(e)),
        Commands::Validate(validate_cmd) => {
            validate_cmd.execute().await.map_err(|e| anyhow::anyhow!(e))
        }
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        std::process::exit(1);
    }
}
