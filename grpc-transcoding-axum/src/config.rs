//! Gateway configuration - static settings fixed at build time.

use std::time::Duration;

use serde::Deserialize;

use crate::executor::ExecutionModel;

/// Default maximum request body size (4 MB), matching gRPC's default receive limit.
pub const DEFAULT_MAX_BODY_SIZE: usize = 4 * 1024 * 1024;

/// Default number of resolved `(method, path)` pairs kept in the route cache.
pub const DEFAULT_ROUTE_CACHE_CAPACITY: usize = 1024;

/// Default time in-flight calls get to finish when the channel shuts down.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(15);

/// JSON printing options for response bodies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PrintOptions {
    /// Pretty-print unary response bodies.
    pub add_whitespace: bool,
    /// Print enum values as numbers instead of names.
    pub always_print_enums_as_ints: bool,
}

/// Gateway-wide configuration.
///
/// Every field has a default, so a partial document deserializes:
///
/// ```
/// use grpc_transcoding_axum::{ExecutionModel, TranscodingConfig};
///
/// let config: TranscodingConfig =
///     serde_json::from_str(r#"{"execution_model": "blocking"}"#).unwrap();
/// assert_eq!(config.execution_model, ExecutionModel::Blocking);
/// assert!(config.auto_mapping);
/// ```
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct TranscodingConfig {
    /// When false the gateway router serves no routes.
    pub enabled: bool,
    /// Expose every method as `POST /{package.Service}/{Method}`.
    pub auto_mapping: bool,
    /// How RPC calls are driven.
    pub execution_model: ExecutionModel,
    /// Response JSON printing.
    pub print_options: PrintOptions,
    /// Route cache bound; `0` disables caching.
    pub route_cache_capacity: usize,
    /// Request body limit; `None` means unlimited.
    pub max_body_size: Option<usize>,
    /// Grace period for in-flight calls on shutdown.
    pub shutdown_timeout: Duration,
    /// Deadline attached to every outgoing call.
    pub call_timeout: Option<Duration>,
}

impl Default for TranscodingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_mapping: true,
            execution_model: ExecutionModel::default(),
            print_options: PrintOptions::default(),
            route_cache_capacity: DEFAULT_ROUTE_CACHE_CAPACITY,
            max_body_size: Some(DEFAULT_MAX_BODY_SIZE),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            call_timeout: None,
        }
    }
}
