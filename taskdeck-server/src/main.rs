//! `taskdeck-server`: reference server for the Taskdeck list API.
//!
//! An axum HTTP server holding one revisioned task list in memory.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:8080, no authentication
//! cargo run --bin taskdeck-server
//!
//! # Custom address and token
//! cargo run --bin taskdeck-server -- --bind 127.0.0.1:9090 --token secret
//!
//! # Or via environment variables
//! TASKDECK_SERVER_ADDR=127.0.0.1:9090 TASKDECK_SERVER_TOKEN=secret cargo run --bin taskdeck-server
//! ```

use std::sync::Arc;

use clap::Parser;
use taskdeck_server::config::{ServerCliArgs, ServerConfig};
use taskdeck_server::server::{self, ApiState};

#[tokio::main]
async fn main() {
    let cli = ServerCliArgs::parse();

    let config = match ServerConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    if config.token.is_none() {
        tracing::warn!("no token configured; accepting unauthenticated requests");
    }
    tracing::info!(addr = %config.bind_addr, "starting taskdeck list server");

    let state = Arc::new(ApiState::new(config.token.clone()));

    match server::start_server_with_state(&config.bind_addr.to_string(), state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "list server listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "list server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start list server");
            std::process::exit(1);
        }
    }
}
