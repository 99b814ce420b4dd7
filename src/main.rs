//! `rpc-gateway` binary: load config, start, wait for a signal, shut down.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use rpc_gateway::config::load_config;
use rpc_gateway::lifecycle::{start, wait_for_signal};
use rpc_gateway::observability::logging::init_logging;

#[derive(Debug, Parser)]
#[command(name = "rpc-gateway", version, about = "Blockchain JSON-RPC gateway")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error loading config {}: {}", cli.config.display(), e);
            return ExitCode::FAILURE;
        }
    };

    init_logging(&config.logging);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting rpc-gateway");

    let gateway = match start(config).await {
        Ok(gateway) => gateway,
        Err(e) => {
            tracing::error!(error = %e, "Error starting gateway");
            return ExitCode::FAILURE;
        }
    };

    wait_for_signal().await;
    gateway.shutdown().await;
    tracing::info!("Shutdown complete");
    ExitCode::SUCCESS
}
