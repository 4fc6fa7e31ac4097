//! # gRPC transcoding for Axum
//!
//! Serve gRPC services as HTTP/JSON APIs. Routes come from the
//! `google.api.http` annotations in your service descriptors; each request is
//! turned into a protobuf message, sent to the backing service over an
//! [`RpcChannel`], and the reply is printed back as JSON. Server streaming
//! methods answer with server-sent events.
//!
//! ## Features
//!
//! - **Descriptor-driven:** works from a `FileDescriptorSet` at runtime through
//!   `prost-reflect`, no generated client code needed.
//! - **Full HTTP rules:** path templates with `*`, `**` and custom verbs, body
//!   and response-body selectors, one level of additional bindings.
//! - **Auto-mapping:** every method is also reachable as
//!   `POST /{package.Service}/{Method}`.
//! - **Two execution models:** calls are awaited on the request task or
//!   driven on the blocking pool; the wire output is identical.
//! - **Graceful shutdown:** the channel stops taking calls and waits a
//!   bounded time for running ones.
//!
//! ## Getting Started
//!
//! ```no_run
//! use grpc_transcoding_axum::prelude::*;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let descriptors = std::fs::read("descriptor.bin")?;
//! let registry = ServiceRegistry::from_file_descriptor_set(&descriptors)?;
//! let channel = GrpcChannel::connect_lazy("http://127.0.0.1:50051")?;
//!
//! let gateway = TranscodingGateway::builder(registry, channel).build();
//! let app: axum::Router = gateway.router();
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, app).await?;
//! gateway.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod config;
pub mod error;
mod executor;
pub mod gateway;
pub mod header;
pub mod json;
pub mod registry;
pub mod resolver;
pub mod route;
pub mod transcoder;

#[cfg(test)]
pub(crate) mod test_util;

pub use channel::{GrpcChannel, ManagedChannel, MessageStream, RpcChannel};
pub use config::{PrintOptions, TranscodingConfig};
pub use error::{BuildError, TranscodingError};
pub use executor::ExecutionModel;
pub use gateway::{TranscodingGateway, TranscodingGatewayBuilder};
pub use header::{DefaultHeaderConverter, HeaderConverter};
pub use registry::ServiceRegistry;
pub use resolver::{DefaultErrorResolver, ErrorResolver};
pub use route::{RouteTable, RuleCustomizer};
pub use transcoder::{Transcoder, Variable};

// Re-export several crates
pub use grpc_transcoding_core;
pub use prost_reflect;
pub use tonic;

pub mod prelude {
    //! A prelude for `grpc-transcoding-axum` providing the most common types.
    pub use crate::channel::{GrpcChannel, RpcChannel};
    pub use crate::config::{PrintOptions, TranscodingConfig};
    pub use crate::error::TranscodingError;
    pub use crate::executor::ExecutionModel;
    pub use crate::gateway::TranscodingGateway;
    pub use crate::registry::ServiceRegistry;
    pub use grpc_transcoding_core::{Code, HttpRule};
}
