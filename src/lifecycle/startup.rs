//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the proxy from configuration
//! - Resolve TLS material when TLS is enabled
//! - Start the metrics exposition alongside the proxy listener
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - The metrics listener is independent, but its failure stops the process

use std::sync::Arc;

use crate::config::ProxyConfig;
use crate::http::server::{ProxyServer, ServerError};
use crate::lifecycle::Shutdown;
use crate::net::listener::{self, ListenerError};
use crate::net::tls::{self, TlsError};
use crate::observability::metrics::serve_metrics;
use crate::observability::ProxyMetrics;

/// Fatal errors between process start and a clean stop.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Server(#[from] ServerError),
    #[error("error configuring TLS: {0}")]
    Tls(#[from] TlsError),
    #[error(transparent)]
    Listener(#[from] ListenerError),
    #[error("error serving proxy: {0}")]
    Serve(std::io::Error),
    #[error("error starting metrics server: {0}")]
    Metrics(std::io::Error),
}

/// Run the proxy and the metrics endpoint until shutdown or a fatal error.
pub async fn run(config: ProxyConfig, shutdown: Shutdown) -> Result<(), StartupError> {
    let server = ProxyServer::new(&config)?;
    let metrics = server.metrics();

    // TLS material is resolved before binding so a bad cert never opens a port.
    let tls_config = if config.tls {
        let policy = tls::load_policy(config.tls_descriptor())?;
        Some(tls::load_tls_config(&policy, &config.crt, &config.key)?)
    } else {
        None
    };

    let listener = listener::bind(config.proxy_addr()).await?;
    let proxy = async {
        let served = match tls_config {
            Some(tls) => server.run_tls(listener, tls, shutdown.subscribe()).await,
            None => server.run(listener, shutdown.subscribe()).await,
        };
        served.map_err(StartupError::Serve)
    };

    let exposition = watch_metrics(config.metrics_addr(), metrics.clone(), &shutdown);

    let result = tokio::select! {
        result = proxy => result,
        result = exposition => result,
    };

    log_totals(&metrics);
    result
}

/// Serve `/metrics` until shutdown. Any return from the server itself is an
/// error, because the process must not keep serving without metrics.
async fn watch_metrics(
    addr: std::net::SocketAddr,
    metrics: Arc<ProxyMetrics>,
    shutdown: &Shutdown,
) -> Result<(), StartupError> {
    let stop = crate::lifecycle::shutdown::recv(shutdown.subscribe());
    tokio::select! {
        result = serve_metrics(addr, metrics) => {
            let e = match result {
                Ok(()) => std::io::Error::other("metrics server exited"),
                Err(e) => e,
            };
            tracing::error!(error = %e, address = %addr, "Error starting metrics server");
            Err(StartupError::Metrics(e))
        }
        _ = stop => {
            // Let the proxy finish draining; it resolves the outer select.
            std::future::pending().await
        }
    }
}

fn log_totals(metrics: &ProxyMetrics) {
    tracing::info!(
        requests = metrics.requests_total(),
        auth_failures = metrics.auth_failures_total(),
        "Proxy stopped"
    );
}
