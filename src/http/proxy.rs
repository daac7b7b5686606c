//! Request forwarding to the single backend.
//!
//! # Responsibilities
//! - Count every request before forwarding
//! - Rewrite the destination (host, path, query) onto the backend
//! - Stream request and response bodies without buffering
//! - Observe latency and emit one log record per request
//!
//! # Design Decisions
//! - Exactly one attempt per request, no retries
//! - Upstream failures become 502 (504 on the optional timeout); metrics and
//!   the log record are still produced
//! - Completion is when the response body has been streamed out (or dropped),
//!   tracked by a guard carried inside the body

use std::convert::Infallible;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use axum::{
    body::{Body, BodyDataStream, Bytes},
    extract::{ConnectInfo, Request},
    http::{
        header,
        uri::{Authority, InvalidUri, Scheme},
        HeaderValue, Method, StatusCode, Uri, Version,
    },
    response::{IntoResponse, Response},
};
use futures_util::{Stream, StreamExt};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tower::service_fn;
use url::Url;

use crate::http::middleware::Handler;
use crate::observability::ProxyMetrics;
use crate::resilience::timeouts::{with_optional_timeout, Elapsed};
use crate::security::headers::{append_forwarded_for, strip_hop_by_hop};

/// Error type for backend target parsing.
#[derive(Debug, thiserror::Error)]
pub enum TargetError {
    #[error("unable to parse backend URL {url:?}: {source}")]
    Parse {
        url: String,
        source: url::ParseError,
    },
    #[error("backend URL {url:?} is not a valid request target: {source}")]
    Uri { url: String, source: InvalidUri },
    #[error("backend URL {0:?} has no host")]
    NoHost(String),
    #[error("backend URL {0:?} must use http or https")]
    Scheme(String),
}

/// Reasons a forwarding attempt produced no upstream response.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("invalid upstream URI: {0}")]
    Uri(#[from] axum::http::Error),
    #[error("upstream request failed: {0}")]
    Upstream(#[from] hyper_util::client::legacy::Error),
    #[error(transparent)]
    Timeout(#[from] Elapsed),
}

impl IntoResponse for ForwardError {
    fn into_response(self) -> Response {
        let status = match self {
            ForwardError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ForwardError::Uri(_) | ForwardError::Upstream(_) => StatusCode::BAD_GATEWAY,
        };
        status.into_response()
    }
}

/// The absolute URL all traffic is forwarded to.
///
/// Components are kept exactly as configured; inbound paths and queries are
/// joined onto them as strings, never re-encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendTarget {
    raw: String,
    scheme: Scheme,
    authority: Authority,
    base_path: String,
    base_query: Option<String>,
}

impl BackendTarget {
    pub fn parse(raw: &str) -> Result<Self, TargetError> {
        let url = Url::parse(raw).map_err(|source| TargetError::Parse {
            url: raw.to_owned(),
            source,
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(TargetError::Scheme(raw.to_owned()));
        }
        if matches!(url.host_str(), None | Some("")) {
            return Err(TargetError::NoHost(raw.to_owned()));
        }

        let uri: Uri = raw.parse().map_err(|source| TargetError::Uri {
            url: raw.to_owned(),
            source,
        })?;
        let (Some(scheme), Some(authority)) = (uri.scheme(), uri.authority()) else {
            return Err(TargetError::NoHost(raw.to_owned()));
        };
        // Credentials in the backend URL never reach the Host header.
        let authority = match authority.as_str().rsplit_once('@') {
            Some((_, host)) => host.parse().map_err(|source| TargetError::Uri {
                url: raw.to_owned(),
                source,
            })?,
            None => authority.clone(),
        };

        Ok(Self {
            raw: raw.to_owned(),
            scheme: scheme.clone(),
            authority,
            base_path: uri.path().to_owned(),
            base_query: uri.query().filter(|q| !q.is_empty()).map(str::to_owned),
        })
    }

    /// `host[:port]` exactly as configured, sent as the rewritten `Host`.
    pub fn authority(&self) -> &str {
        self.authority.as_str()
    }

    /// Map an inbound URI onto the backend. Dot segments are resolved in the
    /// inbound path first, so the result always stays under the base path;
    /// the path is then joined with a single slash and the queries merged.
    pub fn upstream_uri(&self, inbound: &Uri) -> Result<Uri, axum::http::Error> {
        let path = join_paths(&self.base_path, &clean_path(inbound.path()));
        let query = match (
            self.base_query.as_deref(),
            inbound.query().filter(|q| !q.is_empty()),
        ) {
            (Some(base), Some(extra)) => Some(format!("{base}&{extra}")),
            (base, extra) => base.or(extra).map(str::to_owned),
        };
        let path_and_query = match query {
            Some(query) => format!("{path}?{query}"),
            None => path,
        };

        Uri::builder()
            .scheme(self.scheme.clone())
            .authority(self.authority.clone())
            .path_and_query(path_and_query)
            .build()
    }
}

impl std::fmt::Display for BackendTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

fn join_paths(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{}{}", base, &path[1..]),
        (false, false) => format!("{base}/{path}"),
        _ => format!("{base}{path}"),
    }
}

/// `Some(n)` when `segment` is `n` dots, plain or percent-encoded.
fn dot_segment(segment: &str) -> Option<usize> {
    if segment.is_empty() || segment.len() > 6 {
        return None;
    }
    let decoded = segment.to_ascii_lowercase().replace("%2e", ".");
    match decoded.as_str() {
        "." => Some(1),
        ".." => Some(2),
        _ => None,
    }
}

/// Resolve `.` and `..` segments (plain or percent-encoded) without climbing
/// above the root. Every other byte is kept as received.
fn clean_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    let mut ends_in_dir = false;

    for segment in path.split('/').skip(1) {
        ends_in_dir = true;
        match dot_segment(segment) {
            Some(1) => {}
            Some(_) => {
                segments.pop();
            }
            None => {
                segments.push(segment);
                ends_in_dir = false;
            }
        }
    }

    let mut cleaned = format!("/{}", segments.join("/"));
    if ends_in_dir && !cleaned.ends_with('/') {
        cleaned.push('/');
    }
    cleaned
}

/// Per-request state; recording happens when it is dropped.
struct RequestContext {
    path: String,
    method: Method,
    start: Instant,
    metrics: Arc<ProxyMetrics>,
}

impl Drop for RequestContext {
    fn drop(&mut self) {
        let latency = self.start.elapsed();
        self.metrics.observe_latency(latency);
        tracing::info!(
            method = %self.method,
            path = %self.path,
            time = %chrono::Utc::now().to_rfc3339(),
            latency = ?latency,
            "{}",
            self.path
        );
    }
}

/// Upstream response body that owns the request context, so the request
/// completes when the body is exhausted or dropped.
struct CompletingBody {
    stream: BodyDataStream,
    _context: RequestContext,
}

impl Stream for CompletingBody {
    type Item = Result<Bytes, axum::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.stream.poll_next_unpin(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.stream.size_hint()
    }
}

/// Forwards every request to the configured backend.
pub struct ProxyHandler {
    target: BackendTarget,
    client: Client<HttpsConnector<HttpConnector>, Body>,
    metrics: Arc<ProxyMetrics>,
    upstream_timeout: Option<Duration>,
}

impl ProxyHandler {
    pub fn new(
        target: BackendTarget,
        connector: HttpsConnector<HttpConnector>,
        metrics: Arc<ProxyMetrics>,
        upstream_timeout: Option<Duration>,
    ) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(connector);
        Self {
            target,
            client,
            metrics,
            upstream_timeout,
        }
    }

    /// Expose the proxy as a composable handler.
    pub fn into_handler(self) -> Handler {
        let proxy = Arc::new(self);
        Handler::new(service_fn(move |request: Request| {
            let proxy = proxy.clone();
            async move { Ok::<_, Infallible>(proxy.handle(request).await) }
        }))
    }

    /// Forward one request and relay the backend's response.
    pub async fn handle(&self, request: Request) -> Response {
        self.metrics.record_request();

        let context = RequestContext {
            path: request.uri().path().to_owned(),
            method: request.method().clone(),
            start: Instant::now(),
            metrics: self.metrics.clone(),
        };

        match self.forward(request).await {
            Ok(response) => {
                let (parts, body) = response.into_parts();
                let body = CompletingBody {
                    stream: body.into_data_stream(),
                    _context: context,
                };
                Response::from_parts(parts, Body::from_stream(body))
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    backend = %self.target,
                    path = %context.path,
                    "Upstream error"
                );
                e.into_response()
            }
        }
    }

    async fn forward(&self, request: Request) -> Result<Response, ForwardError> {
        let (mut parts, body) = request.into_parts();

        parts.uri = self.target.upstream_uri(&parts.uri)?;
        parts.version = Version::HTTP_11;

        strip_hop_by_hop(&mut parts.headers);
        if let Some(ConnectInfo(peer)) = parts.extensions.get::<ConnectInfo<SocketAddr>>() {
            append_forwarded_for(&mut parts.headers, peer.ip());
        }
        if let Ok(host) = HeaderValue::from_str(self.target.authority()) {
            parts.headers.insert(header::HOST, host);
        }

        let upstream = Request::from_parts(parts, body);
        let response = with_optional_timeout(self.upstream_timeout, self.client.request(upstream))
            .await??;

        let (mut parts, body) = response.into_parts();
        strip_hop_by_hop(&mut parts.headers);
        Ok(Response::from_parts(parts, Body::new(body)))
    }
}
