//! Timeout enforcement.
//!
//! # Responsibilities
//! - Optionally bound the wait for an upstream response
//!
//! # Design Decisions
//! - No limit unless one is configured; a hung backend then holds its
//!   request task indefinitely
//! - Timeout errors are distinct from other errors and map to 504

use std::future::Future;
use std::time::Duration;

/// Raised when an upstream call exceeds its configured limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("upstream did not respond within {0:?}")]
pub struct Elapsed(pub Duration);

/// Await `future`, giving up after `limit` when one is set.
pub async fn with_optional_timeout<F>(limit: Option<Duration>, future: F) -> Result<F::Output, Elapsed>
where
    F: Future,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, future)
            .await
            .map_err(|_| Elapsed(limit)),
        None => Ok(future.await),
    }
}
