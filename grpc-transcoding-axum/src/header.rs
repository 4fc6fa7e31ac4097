//! Header ⇄ metadata conversion.
//!
//! Forwarding is mechanical. HTTP → RPC drops every standard HTTP header
//! except `authorization`. RPC → HTTP drops the same set, plus `grpc-`
//! prefixed keys and binary (`-bin`) keys.

use axum::http::HeaderMap;
use tonic::metadata::MetadataMap;

/// Standard HTTP header names that never cross the gateway, lowercase.
///
/// `authorization` is not listed, so it is always forwarded.
const STANDARD_HEADERS: &[&str] = &[
    "accept",
    "accept-charset",
    "accept-encoding",
    "accept-language",
    "accept-patch",
    "accept-ranges",
    "access-control-allow-credentials",
    "access-control-allow-headers",
    "access-control-allow-methods",
    "access-control-allow-origin",
    "access-control-expose-headers",
    "access-control-max-age",
    "access-control-request-headers",
    "access-control-request-method",
    "age",
    "allow",
    "cache-control",
    "connection",
    "content-disposition",
    "content-encoding",
    "content-language",
    "content-length",
    "content-location",
    "content-range",
    "content-type",
    "cookie",
    "date",
    "etag",
    "expect",
    "expires",
    "forwarded",
    "from",
    "host",
    "if-match",
    "if-modified-since",
    "if-none-match",
    "if-range",
    "if-unmodified-since",
    "keep-alive",
    "last-modified",
    "link",
    "location",
    "max-forwards",
    "origin",
    "pragma",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "range",
    "referer",
    "retry-after",
    "server",
    "set-cookie",
    "set-cookie2",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "user-agent",
    "vary",
    "via",
    "warning",
    "www-authenticate",
];

const RESERVED_PREFIX: &str = "grpc-";
const BINARY_SUFFIX: &str = "-bin";

/// Converts headers between the HTTP side and the RPC side of a call.
///
/// Implement this to change which headers are forwarded; the gateway uses
/// [`DefaultHeaderConverter`] unless told otherwise.
pub trait HeaderConverter: Send + Sync + 'static {
    /// Inbound HTTP request headers → outgoing RPC metadata.
    fn to_metadata(&self, headers: &HeaderMap) -> MetadataMap;

    /// RPC response headers or trailers → HTTP response headers.
    fn to_headers(&self, metadata: &MetadataMap) -> HeaderMap;
}

/// The stock [`HeaderConverter`].
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultHeaderConverter;

impl DefaultHeaderConverter {
    pub fn new() -> Self {
        Self
    }

    fn is_standard(name: &str) -> bool {
        STANDARD_HEADERS.contains(&name)
    }
}

impl HeaderConverter for DefaultHeaderConverter {
    fn to_metadata(&self, headers: &HeaderMap) -> MetadataMap {
        let mut forwarded = HeaderMap::with_capacity(headers.len());
        for (name, value) in headers {
            let key = name.as_str();
            // binary metadata is never forwarded
            if Self::is_standard(key) || key.ends_with(BINARY_SUFFIX) {
                continue;
            }
            forwarded.append(name.clone(), value.clone());
        }
        MetadataMap::from_headers(forwarded)
    }

    fn to_headers(&self, metadata: &MetadataMap) -> HeaderMap {
        let mut result = HeaderMap::new();
        let headers = metadata.clone().into_headers();
        for (name, value) in &headers {
            let key = name.as_str();
            if Self::is_standard(key)
                || key.starts_with(RESERVED_PREFIX)
                || key.ends_with(BINARY_SUFFIX)
            {
                continue;
            }
            result.append(name.clone(), value.clone());
        }
        result
    }
}
