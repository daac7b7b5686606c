//! Handler composition.
//!
//! A `Handler` is a cloneable, type-erased service from request to response.
//! A `Middleware` turns one handler into another. `compose` applies an
//! ordered list of middleware so that the first entry is outermost: it sees
//! the request first and the response last.

pub mod basic_auth;

use std::convert::Infallible;

use axum::{extract::Request, response::Response};
use tower::util::BoxCloneSyncService;

pub use basic_auth::{basic_auth, Credentials};

/// Type-erased request handler.
pub type Handler = BoxCloneSyncService<Request, Response, Infallible>;

/// A handler-to-handler transformation.
pub type Middleware = Box<dyn FnOnce(Handler) -> Handler + Send>;

/// Wrap `handler` in `middleware`, first entry outermost.
pub fn compose<I>(handler: Handler, middleware: I) -> Handler
where
    I: IntoIterator<Item = Middleware>,
    I::IntoIter: DoubleEndedIterator,
{
    middleware
        .into_iter()
        .rev()
        .fold(handler, |inner, wrap| wrap(inner))
}
