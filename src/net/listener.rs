//! TCP listener binding.
//!
//! # Responsibilities
//! - Bind the proxy address
//! - Report bind failures as fatal startup errors
//!
//! Overload behaviour is left to the kernel backlog; there is no admission
//! control in front of the proxy handler.

use std::net::SocketAddr;
use tokio::net::TcpListener;

/// Error type for listener operations.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    /// Failed to bind to address.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
}

/// Bind a TCP listener on `addr`.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener, ListenerError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ListenerError::Bind { addr, source })?;

    let local_addr = listener
        .local_addr()
        .map_err(|source| ListenerError::Bind { addr, source })?;

    tracing::info!(address = %local_addr, "Listener bound");
    Ok(listener)
}
