//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum router, plain or TLS serving)
//!     → middleware/basic_auth.rs (reject unauthenticated requests)
//!     → proxy.rs (host rewrite, forward, time, count, log)
//!     → Stream backend response to client
//! ```

pub mod middleware;
pub mod proxy;
pub mod server;

pub use proxy::{BackendTarget, ProxyHandler};
pub use server::ProxyServer;
