//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Own the proxy's Prometheus registry
//! - Count requests and authentication failures
//! - Observe response latency
//! - Serve the text exposition on `/metrics`
//!
//! # Metrics
//! - `p3y_total_requests` (counter): every request reaching the proxy handler
//! - `p3y_total_authentication_failures` (counter): rejected Basic Auth attempts
//! - `p3y_response_time` (summary): forwarding latency in seconds
//!
//! # Design Decisions
//! - The registry is private to a `ProxyMetrics` value, not the global recorder,
//!   so each server instance (and each test) counts in isolation
//! - Histograms are rendered as summaries (no buckets configured)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, routing::get, Router};
use metrics::{Counter, Histogram, Key, Level, Metadata, Recorder};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::net::TcpListener;

pub const REQUESTS_TOTAL: &str = "p3y_total_requests";
pub const AUTH_FAILURES_TOTAL: &str = "p3y_total_authentication_failures";
pub const RESPONSE_TIME: &str = "p3y_response_time";

/// Interval between histogram upkeep runs on the exposition task.
const UPKEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Process-wide request metrics, shared by every handler through an `Arc`.
pub struct ProxyMetrics {
    requests: Counter,
    auth_failures: Counter,
    latency: Histogram,
    handle: PrometheusHandle,
}

impl ProxyMetrics {
    /// Create a fresh registry with the three proxy series registered.
    pub fn new() -> Self {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let metadata = Metadata::new(module_path!(), Level::INFO, Some(module_path!()));

        recorder.describe_counter(
            REQUESTS_TOTAL.into(),
            None,
            "Total number of requests received.".into(),
        );
        recorder.describe_counter(
            AUTH_FAILURES_TOTAL.into(),
            None,
            "Total number of authentication failures.".into(),
        );
        recorder.describe_histogram(RESPONSE_TIME.into(), None, "Response latency.".into());

        Self {
            requests: recorder.register_counter(&Key::from_static_name(REQUESTS_TOTAL), &metadata),
            auth_failures: recorder
                .register_counter(&Key::from_static_name(AUTH_FAILURES_TOTAL), &metadata),
            latency: recorder.register_histogram(&Key::from_static_name(RESPONSE_TIME), &metadata),
            handle,
        }
    }

    pub fn record_request(&self) {
        self.requests.increment(1);
    }

    pub fn record_auth_failure(&self) {
        self.auth_failures.increment(1);
    }

    pub fn observe_latency(&self, latency: Duration) {
        self.latency.record(latency.as_secs_f64());
    }

    /// Render the registry in the Prometheus text exposition format.
    pub fn render(&self) -> String {
        self.handle.render()
    }

    /// Current value of an unlabelled series, e.g. `p3y_total_requests` or
    /// `p3y_response_time_count`. Series that were never touched read as zero.
    pub fn sample(&self, series: &str) -> f64 {
        self.render()
            .lines()
            .filter(|line| !line.starts_with('#'))
            .find_map(|line| {
                let (name, value) = line.split_once(' ')?;
                (name == series).then(|| value.trim().parse().ok()).flatten()
            })
            .unwrap_or(0.0)
    }

    pub fn requests_total(&self) -> u64 {
        self.sample(REQUESTS_TOTAL) as u64
    }

    pub fn auth_failures_total(&self) -> u64 {
        self.sample(AUTH_FAILURES_TOTAL) as u64
    }

    /// Number of latency observations recorded so far.
    pub fn latency_count(&self) -> u64 {
        self.sample(&format!("{RESPONSE_TIME}_count")) as u64
    }

    fn run_upkeep(&self) {
        self.handle.run_upkeep();
    }
}

impl Default for ProxyMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProxyMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyMetrics").finish_non_exhaustive()
    }
}

/// Router exposing `GET /metrics`.
pub fn metrics_router(metrics: Arc<ProxyMetrics>) -> Router {
    Router::new()
        .route("/metrics", get(render_metrics))
        .with_state(metrics)
}

async fn render_metrics(State(metrics): State<Arc<ProxyMetrics>>) -> String {
    metrics.render()
}

/// Bind and serve the metrics exposition until the listener fails.
///
/// Runs histogram upkeep alongside the server. Returning at all means the
/// endpoint is gone, which callers treat as fatal.
pub async fn serve_metrics(
    addr: SocketAddr,
    metrics: Arc<ProxyMetrics>,
) -> Result<(), std::io::Error> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(address = %listener.local_addr()?, "Starting metrics server");

    let upkeep = {
        let metrics = metrics.clone();
        async move {
            let mut interval = tokio::time::interval(UPKEEP_INTERVAL);
            loop {
                interval.tick().await;
                metrics.run_upkeep();
            }
        }
    };

    tokio::select! {
        result = axum::serve(listener, metrics_router(metrics)) => result,
        _ = upkeep => Ok(()),
    }
}
