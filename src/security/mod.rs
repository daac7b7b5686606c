//! Security subsystem.
//!
//! # Components
//! - `headers.rs`: hop-by-hop stripping and X-Forwarded-For
//!
//! Client authentication lives with the HTTP middleware in
//! `http::middleware::basic_auth`.

pub mod headers;
