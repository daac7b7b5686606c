//! p3y reverse proxy
//!
//! Forwards every request to one backend, optionally behind Basic Auth,
//! and exposes Prometheus metrics on a second port.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──▶ listener (http/https) ──▶ basic auth ──▶ proxy ──▶ Backend
//!                                              │            │
//!                                              ▼            ▼
//!                                         metrics registry ◀┘
//!                                              │
//!                                              ▼
//!                                  GET /metrics (metrics port)
//! ```

use std::process::ExitCode;

use clap::Parser;

use p3y::lifecycle::{signals, startup};
use p3y::observability::logging;
use p3y::{ProxyConfig, Shutdown};

#[tokio::main]
async fn main() -> ExitCode {
    let config = ProxyConfig::parse();

    if let Err(e) = logging::init(&config.log_output()) {
        eprintln!("p3y: {e}");
        return ExitCode::FAILURE;
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        backend = %config.backend,
        address = %config.proxy_addr(),
        metrics_address = %config.metrics_addr(),
        tls = config.tls,
        auth = config.credentials().is_enabled(),
        "p3y starting"
    );

    let shutdown = Shutdown::new();
    tokio::spawn(signals::watch(shutdown.clone()));

    match startup::run(config, shutdown).await {
        Ok(()) => {
            tracing::info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Fatal error");
            eprintln!("p3y: {e}");
            ExitCode::FAILURE
        }
    }
}
