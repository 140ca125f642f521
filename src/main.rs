//! # call-relay
//!
//! Relay binary: reads configuration, starts the HTTP/WebSocket server and
//! runs until Ctrl-C or SIGTERM.

#![deny(unsafe_code)]

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use relay_server::RelayConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    relay_telemetry::init_telemetry(&cli.telemetry_config())
        .context("failed to initialise logging")?;

    // Missing secrets end the process here, before any listener opens.
    let mut config = RelayConfig::from_env().context("invalid configuration")?;
    cli.apply(&mut config);

    let handle = relay_server::start(config)
        .await
        .context("failed to start relay server")?;
    tracing::info!(addr = %handle.addr(), "Relay ready");

    relay_server::wait_for_signal().await;
    tracing::info!("Shutting down");
    if !handle.shutdown(None).await {
        tracing::warn!("Shutdown did not complete cleanly");
    }
    Ok(())
}
