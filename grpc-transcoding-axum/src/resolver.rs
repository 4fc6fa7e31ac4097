//! Rendering of failed RPC calls.
//!
//! When the backend answers a call with a non-OK status, the gateway hands the
//! status and its converted trailers to an [`ErrorResolver`]. The resolver
//! decides the whole HTTP response. Gateway-level rejections (bad input,
//! unknown route, wrong method) and failures in the middle of an SSE stream
//! do not go through it.

use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use tonic::Status;

use crate::error::TranscodingError;

/// Turns a failed call into an HTTP response.
///
/// Any `Fn(&Status, HeaderMap) -> Response` closure works.
pub trait ErrorResolver: Send + Sync + 'static {
    /// `headers` are the status trailers after header conversion.
    fn resolve(&self, status: &Status, headers: HeaderMap) -> Response;
}

impl<F> ErrorResolver for F
where
    F: Fn(&Status, HeaderMap) -> Response + Send + Sync + 'static,
{
    fn resolve(&self, status: &Status, headers: HeaderMap) -> Response {
        self(status, headers)
    }
}

/// The stock [`ErrorResolver`]: the HTTP status comes from the status table,
/// the body is `{"code": "...", "message": "..."}` and the trailers become
/// headers.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultErrorResolver;

impl ErrorResolver for DefaultErrorResolver {
    fn resolve(&self, status: &Status, headers: HeaderMap) -> Response {
        TranscodingError::new(status.code().into(), status.message())
            .with_headers(headers)
            .into_response()
    }
}
