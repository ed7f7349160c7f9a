//! `pairlink-relay` binary.
//!
//! ```bash
//! pairlink-relay                          # 0.0.0.0:5000
//! PORT=8080 pairlink-relay                # 0.0.0.0:8080
//! pairlink-relay --bind 127.0.0.1:8080
//! pairlink-relay --config ./relay.toml --log-level debug
//! ```

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use pairlink_relay::config::{RelayArgs, RelayConfig};
use pairlink_relay::relay::{self, RelayState};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match RelayConfig::from_args(&RelayArgs::parse()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("pairlink-relay: {e}");
            return ExitCode::from(2);
        }
    };

    // RUST_LOG wins over the configured level.
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!(
        addr = %config.bind_addr,
        max_frame_size = config.max_frame_size,
        "starting pairlink relay"
    );

    let state = Arc::new(RelayState::with_config(config.max_frame_size));
    let (addr, server) = match relay::start_server_with_state(&config.bind_addr, state).await {
        Ok(started) => started,
        Err(e) => {
            tracing::error!(addr = %config.bind_addr, error = %e, "cannot listen");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(%addr, "signalling server listening");

    match server.await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "server task ended abnormally");
            ExitCode::FAILURE
        }
    }
}
