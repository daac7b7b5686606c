//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! command-line flags, environment variables, defaults
//!     → schema.rs (clap parse, precedence flag > env > default)
//!     → ProxyConfig (immutable for the process lifetime)
//!     → read once by startup to build the server
//! ```

pub mod schema;

pub use schema::ProxyConfig;
