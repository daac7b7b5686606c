//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Startup
//!     → listener.rs (bind proxy address)
//!     → tls.rs (optional: policy + cert/key → rustls ServerConfig)
//!     → Hand off to HTTP layer (plain axum or axum-server with rustls)
//!
//! Forwarding
//!     → tls.rs (backend connector, optional skip-verify)
//! ```

pub mod listener;
pub mod tls;
