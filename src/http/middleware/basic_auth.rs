//! HTTP Basic authentication.
//!
//! Requests must carry `Authorization: <scheme> <base64(user:pass)>` matching
//! the configured credentials. Only the token layout is checked, not the
//! scheme name. A missing header is rejected exactly like a malformed one.
//! Every rejection is counted in `p3y_total_authentication_failures`.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::{from_fn_with_state, Next},
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::STANDARD, Engine};
use tower::Layer;

use super::{Handler, Middleware};
use crate::observability::ProxyMetrics;

pub const CHALLENGE: &str = r#"Basic realm="Restricted""#;

/// Credentials guarding the proxy. Auth is off unless a username is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    Disabled,
    Basic { username: String, password: String },
}

impl Credentials {
    /// Build from configured values; an empty username disables auth and an
    /// empty password is allowed.
    pub fn from_parts(username: &str, password: &str) -> Self {
        if username.is_empty() {
            Credentials::Disabled
        } else {
            Credentials::Basic {
                username: username.to_owned(),
                password: password.to_owned(),
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Credentials::Basic { .. })
    }
}

/// Reasons an `Authorization` header is rejected.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Not authorized")]
    Malformed,
    #[error("{0}")]
    Decode(#[from] base64::DecodeError),
    #[error("Not authorized")]
    Shape,
    #[error("Not authorized")]
    Mismatch,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (
            StatusCode::UNAUTHORIZED,
            [
                (header::WWW_AUTHENTICATE, HeaderValue::from_static(CHALLENGE)),
                (
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("text/plain; charset=utf-8"),
                ),
                (
                    header::X_CONTENT_TYPE_OPTIONS,
                    HeaderValue::from_static("nosniff"),
                ),
            ],
            format!("{self}\n"),
        )
            .into_response()
    }
}

/// Check a raw `Authorization` value against the expected pair.
pub fn verify(header: &str, username: &str, password: &str) -> Result<(), AuthError> {
    let (_scheme, payload) = header.split_once(' ').ok_or(AuthError::Malformed)?;
    let decoded = STANDARD.decode(payload)?;
    let decoded = String::from_utf8(decoded).map_err(|_| AuthError::Shape)?;
    let (user, pass) = decoded.split_once(':').ok_or(AuthError::Shape)?;

    if user != username || pass != password {
        return Err(AuthError::Mismatch);
    }
    Ok(())
}

#[derive(Debug)]
struct BasicAuth {
    username: String,
    password: String,
    metrics: Arc<ProxyMetrics>,
}

/// Middleware enforcing `credentials`. With `Credentials::Disabled` the
/// handler is returned untouched.
pub fn basic_auth(credentials: Credentials, metrics: Arc<ProxyMetrics>) -> Middleware {
    Box::new(move |inner: Handler| match credentials {
        Credentials::Disabled => inner,
        Credentials::Basic { username, password } => {
            let state = Arc::new(BasicAuth {
                username,
                password,
                metrics,
            });
            Handler::new(from_fn_with_state(state, require_basic_auth).layer(inner))
        }
    })
}

async fn require_basic_auth(
    State(auth): State<Arc<BasicAuth>>,
    request: Request,
    next: Next,
) -> Response {
    let header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    match verify(header, &auth.username, &auth.password) {
        Ok(()) => next.run(request).await,
        Err(e) => {
            auth.metrics.record_auth_failure();
            tracing::debug!(reason = ?e, path = %request.uri().path(), "Rejected request");
            e.into_response()
        }
    }
}
