//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Build server → Resolve TLS → Bind → Serve proxy and metrics
//!
//! Shutdown (shutdown.rs):
//!     Trigger → Stop accepting → Drain in-flight requests → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - TLS material is checked before any port is opened
//! - A failing metrics listener is fatal, like a failing proxy listener

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
