//! Error types for the transcoding gateway.
//!
//! [`TranscodingError`] is what a request turns into when it cannot be served:
//! a transcoding failure on the way in, an RPC status on the way back, or a
//! gateway-level rejection (wrong HTTP method, oversized body). It renders as
//! a JSON body `{"code": "...", "message": "..."}` with the mapped HTTP status
//! and any forwarded trailer headers.
//!
//! [`BuildError`] covers startup failures while assembling the gateway.

use axum::{
    Json,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use grpc_transcoding_core::{Code, TemplateError};
use prost_reflect::MethodDescriptor;
use serde::Serialize;

use crate::header::{DefaultHeaderConverter, HeaderConverter};
use crate::transcoder::TranscodeError;

/// An error that ends a transcoded request.
#[derive(Clone, Debug, thiserror::Error)]
#[error("{code}: {message}")]
pub struct TranscodingError {
    status: StatusCode,
    code: Code,
    message: String,
    meta: Option<HeaderMap>,
}

impl TranscodingError {
    /// Create an error whose HTTP status is derived from `code`.
    pub fn new<S: Into<String>>(code: Code, message: S) -> Self {
        Self {
            status: code.http_status(),
            code,
            message: message.into(),
            meta: None,
        }
    }

    /// Create an invalid argument error (HTTP 400).
    pub fn new_invalid_argument<S: Into<String>>(message: S) -> Self {
        Self::new(Code::InvalidArgument, message)
    }

    /// Create an internal error (HTTP 500).
    pub fn new_internal<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Internal, message)
    }

    /// A route was found but its RPC is client or bidi streaming (HTTP 500).
    pub fn new_unsupported_method_type(method: &MethodDescriptor) -> Self {
        Self::new_internal(format!(
            "unsupported method type for {}: only unary and server streaming methods can be transcoded",
            method.full_name()
        ))
    }

    /// A server streaming route was called with something other than GET (HTTP 405).
    pub fn new_method_not_allowed<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Unimplemented, message).with_status(StatusCode::METHOD_NOT_ALLOWED)
    }

    /// The request body exceeded the configured limit (HTTP 413).
    pub fn new_payload_too_large<S: Into<String>>(message: S) -> Self {
        Self::new(Code::ResourceExhausted, message).with_status(StatusCode::PAYLOAD_TOO_LARGE)
    }

    /// Convert an RPC failure, forwarding its trailers through `converter`.
    pub fn from_status(status: &tonic::Status, converter: &dyn HeaderConverter) -> Self {
        Self::new(status.code().into(), status.message())
            .with_headers(converter.to_headers(status.metadata()))
    }

    /// Forward `headers` with the error response. An empty map is ignored.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        if !headers.is_empty() {
            self.meta
                .get_or_insert_with(HeaderMap::new)
                .extend(headers);
        }
        self
    }

    /// Override the HTTP status.
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Get the HTTP status.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Get the RPC status code.
    pub fn code(&self) -> Code {
        self.code
    }

    /// Get the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the headers forwarded with this error, if any.
    pub fn meta(&self) -> Option<&HeaderMap> {
        self.meta.as_ref()
    }

    /// The JSON body of this error, as sent in responses and SSE error events.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "code": self.code,
            "message": self.message,
        })
    }
}

/// The JSON body structure for error responses.
#[derive(Serialize)]
struct ErrorResponseBody<'a> {
    code: Code,
    message: &'a str,
}

impl IntoResponse for TranscodingError {
    fn into_response(self) -> Response {
        let body = ErrorResponseBody {
            code: self.code,
            message: &self.message,
        };
        let mut response = (self.status, Json(body)).into_response();

        if let Some(meta) = &self.meta {
            let headers = response.headers_mut();
            headers.extend(meta.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        response
    }
}

impl From<TranscodeError> for TranscodingError {
    fn from(err: TranscodeError) -> Self {
        Self::new_invalid_argument(err.to_string())
    }
}

impl From<TemplateError> for TranscodingError {
    fn from(err: TemplateError) -> Self {
        Self::new_internal(err.to_string())
    }
}

impl From<tonic::Status> for TranscodingError {
    fn from(status: tonic::Status) -> Self {
        Self::from_status(&status, &DefaultHeaderConverter::new())
    }
}

/// Errors raised while building a gateway.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// The descriptor set could not be decoded.
    #[error("failed to decode descriptor set: {0}")]
    Descriptor(#[from] prost_reflect::DescriptorError),

    /// A requested service is not in the descriptor pool.
    #[error("service '{0}' not found in descriptor pool")]
    UnknownService(String),
}
