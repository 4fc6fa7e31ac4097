//! Core types for gRPC ⇄ HTTP/JSON transcoding.
//!
//! This crate holds the pieces of the gateway that do not depend on a
//! runtime or a web framework, shared by `grpc-transcoding-axum`.
//!
//! ## Modules
//!
//! - [`error`]: RPC status codes and the RPC → HTTP status table
//! - [`http_rule`]: the `google.api.http` rule model
//! - [`path_template`]: path template parsing and matching

mod error;
pub mod http_rule;
mod path_template;

pub use error::*;
pub use http_rule::{BODY_WILDCARD, CustomHttpPattern, HTTP_RULE_EXTENSION_NAME, HTTP_RULE_EXTENSION_NUMBER, HttpRule};
pub use path_template::*;
