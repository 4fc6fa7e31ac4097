//! The `google.api.http` rule model.
//!
//! [`HttpRule`] mirrors `google/api/http.proto` field-for-field so it can be
//! decoded straight out of a method's options. Only the pieces the gateway
//! acts on get helpers: the pattern (HTTP method + path template), the body
//! selector, the response-body selector and one level of additional bindings.

use http::Method;

/// Extension field number of `google.api.http` on `google.protobuf.MethodOptions`.
pub const HTTP_RULE_EXTENSION_NUMBER: u32 = 72295728;

/// Fully-qualified name of the `google.api.http` extension.
pub const HTTP_RULE_EXTENSION_NAME: &str = "google.api.http";

/// Body selector meaning "every field not bound by the path".
pub const BODY_WILDCARD: &str = "*";

/// Declarative mapping of an RPC method onto an HTTP method and path.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HttpRule {
    #[prost(string, tag = "1")]
    pub selector: ::prost::alloc::string::String,
    #[prost(string, tag = "7")]
    pub body: ::prost::alloc::string::String,
    #[prost(string, tag = "12")]
    pub response_body: ::prost::alloc::string::String,
    #[prost(message, repeated, tag = "11")]
    pub additional_bindings: ::prost::alloc::vec::Vec<HttpRule>,
    #[prost(oneof = "http_rule::Pattern", tags = "2, 3, 4, 5, 6, 8")]
    pub pattern: ::core::option::Option<http_rule::Pattern>,
}

/// Nested types of [`HttpRule`].
pub mod http_rule {
    #[derive(Clone, PartialEq, Eq, Hash, ::prost::Oneof)]
    pub enum Pattern {
        #[prost(string, tag = "2")]
        Get(::prost::alloc::string::String),
        #[prost(string, tag = "3")]
        Put(::prost::alloc::string::String),
        #[prost(string, tag = "4")]
        Post(::prost::alloc::string::String),
        #[prost(string, tag = "5")]
        Delete(::prost::alloc::string::String),
        #[prost(string, tag = "6")]
        Patch(::prost::alloc::string::String),
        #[prost(message, tag = "8")]
        Custom(super::CustomHttpPattern),
    }
}

pub use self::http_rule::Pattern;

/// A pattern for an HTTP method outside the standard five.
#[derive(Clone, PartialEq, Eq, Hash, ::prost::Message)]
pub struct CustomHttpPattern {
    #[prost(string, tag = "1")]
    pub kind: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub path: ::prost::alloc::string::String,
}

impl HttpRule {
    /// A rule binding `GET` to `path`.
    pub fn get<S: Into<String>>(path: S) -> Self {
        Self::with_pattern(http_rule::Pattern::Get(path.into()))
    }

    /// A rule binding `PUT` to `path`.
    pub fn put<S: Into<String>>(path: S) -> Self {
        Self::with_pattern(http_rule::Pattern::Put(path.into()))
    }

    /// A rule binding `POST` to `path`.
    pub fn post<S: Into<String>>(path: S) -> Self {
        Self::with_pattern(http_rule::Pattern::Post(path.into()))
    }

    /// A rule binding `DELETE` to `path`.
    pub fn delete<S: Into<String>>(path: S) -> Self {
        Self::with_pattern(http_rule::Pattern::Delete(path.into()))
    }

    /// A rule binding `PATCH` to `path`.
    pub fn patch<S: Into<String>>(path: S) -> Self {
        Self::with_pattern(http_rule::Pattern::Patch(path.into()))
    }

    /// A rule binding an arbitrary HTTP method (`kind`) to `path`.
    pub fn custom<K: Into<String>, S: Into<String>>(kind: K, path: S) -> Self {
        Self::with_pattern(http_rule::Pattern::Custom(CustomHttpPattern {
            kind: kind.into(),
            path: path.into(),
        }))
    }

    fn with_pattern(pattern: http_rule::Pattern) -> Self {
        Self {
            pattern: Some(pattern),
            ..Default::default()
        }
    }

    /// Set the body selector.
    pub fn with_body<S: Into<String>>(mut self, body: S) -> Self {
        self.body = body.into();
        self
    }

    /// Set the response-body selector.
    pub fn with_response_body<S: Into<String>>(mut self, response_body: S) -> Self {
        self.response_body = response_body.into();
        self
    }

    /// Append an additional binding.
    pub fn with_additional_binding(mut self, binding: HttpRule) -> Self {
        self.additional_bindings.push(binding);
        self
    }

    /// The HTTP method and path template of this rule's pattern.
    ///
    /// Returns `None` when no pattern is set or a custom kind is not a valid
    /// HTTP method token.
    pub fn method_and_path(&self) -> Option<(Method, &str)> {
        use http_rule::Pattern;

        match self.pattern.as_ref()? {
            Pattern::Get(path) => Some((Method::GET, path)),
            Pattern::Put(path) => Some((Method::PUT, path)),
            Pattern::Post(path) => Some((Method::POST, path)),
            Pattern::Delete(path) => Some((Method::DELETE, path)),
            Pattern::Patch(path) => Some((Method::PATCH, path)),
            Pattern::Custom(custom) => {
                let method = Method::from_bytes(custom.kind.to_ascii_uppercase().as_bytes()).ok()?;
                Some((method, &custom.path))
            }
        }
    }

    /// The body selector, `None` when the request carries no body.
    pub fn body_selector(&self) -> Option<&str> {
        let body = self.body.trim();
        (!body.is_empty()).then_some(body)
    }

    /// The response-body selector, `None` when the whole response is returned.
    pub fn response_body_selector(&self) -> Option<&str> {
        let body = self.response_body.trim();
        (!body.is_empty()).then_some(body)
    }
}
