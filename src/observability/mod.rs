//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Proxy handler and auth middleware produce:
//!     → metrics.rs (request/auth-failure counters, latency summary)
//!     → logging.rs (one JSON record per forwarded request)
//!
//! Consumers:
//!     → Metrics endpoint (Prometheus scrape on the metrics port)
//!     → Log sink (stdout, stderr, or file)
//! ```

pub mod logging;
pub mod metrics;

pub use metrics::ProxyMetrics;
