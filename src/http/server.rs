//! HTTP server setup.
//!
//! # Responsibilities
//! - Parse the backend and build the forwarding client
//! - Compose the handler chain (auth, then proxy)
//! - Serve on a plain or TLS listener until shutdown
//!
//! # Lifecycle
//! ```text
//! Unconfigured --ProxyServer::new--> Bound --run / run_tls--> Serving
//! Serving --shutdown signal--> Stopped
//! Serving --listener error--> Fatal (error returned to the caller)
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::config::ProxyConfig;
use crate::http::middleware::{basic_auth, compose, Handler};
use crate::http::proxy::{BackendTarget, ProxyHandler, TargetError};
use crate::lifecycle::shutdown;
use crate::net::tls::{self, TlsError};
use crate::observability::ProxyMetrics;

/// Error type for building the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Target(#[from] TargetError),
    #[error(transparent)]
    Tls(#[from] TlsError),
}

/// The reverse proxy, configured and ready to serve.
pub struct ProxyServer {
    router: Router,
    target: BackendTarget,
    metrics: Arc<ProxyMetrics>,
}

impl ProxyServer {
    /// Parse the backend and assemble the handler chain.
    pub fn new(config: &ProxyConfig) -> Result<Self, ServerError> {
        let target = BackendTarget::parse(&config.backend)?;
        let metrics = Arc::new(ProxyMetrics::new());
        let connector = tls::backend_connector(config.skip_verify)?;

        let proxy = ProxyHandler::new(
            target.clone(),
            connector,
            metrics.clone(),
            config.upstream_timeout(),
        );
        let handler = compose(
            proxy.into_handler(),
            vec![basic_auth(config.credentials(), metrics.clone())],
        );

        Ok(Self {
            router: Self::build_router(handler),
            target,
            metrics,
        })
    }

    /// Every path and method goes to the handler chain.
    fn build_router(handler: Handler) -> Router {
        Router::new()
            .route_service("/", handler.clone())
            .route_service("/{*path}", handler)
    }

    pub fn target(&self) -> &BackendTarget {
        &self.target
    }

    /// Shared metrics, for the exposition endpoint.
    pub fn metrics(&self) -> Arc<ProxyMetrics> {
        self.metrics.clone()
    }

    /// Serve plain HTTP on `listener` until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        tracing::info!(
            address = %listener.local_addr()?,
            backend = %self.target,
            "Starting reverse proxy"
        );

        let app = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown::recv(shutdown))
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Serve HTTPS on `listener` with `tls` until `shutdown` fires.
    pub async fn run_tls(
        self,
        listener: TcpListener,
        tls: RustlsConfig,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        tracing::info!(
            address = %listener.local_addr()?,
            backend = %self.target,
            "Starting reverse proxy in TLS mode"
        );

        let handle = axum_server::Handle::new();
        let stopper = handle.clone();
        tokio::spawn(async move {
            shutdown::recv(shutdown).await;
            stopper.graceful_shutdown(None);
        });

        axum_server::from_tcp_rustls(listener.into_std()?, tls)
            .handle(handle)
            .serve(
                self.router
                    .into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await?;

        tracing::info!("HTTPS server stopped");
        Ok(())
    }
}
