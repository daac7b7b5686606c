//! Resilience subsystem.
//!
//! # Components
//! - `timeouts.rs`: optional bound on the upstream wait
//!
//! Forwarding is attempted once per request; there is no retry or circuit
//! breaking against the single backend.

pub mod timeouts;
