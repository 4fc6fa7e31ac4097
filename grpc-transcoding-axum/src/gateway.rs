//! The gateway: route table, call executor and channel behind one axum
//! fallback handler.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use grpc_transcoding_core::HttpRule;

use crate::channel::{ManagedChannel, RpcChannel};
use crate::config::{PrintOptions, TranscodingConfig};
use crate::executor::{CallExecutor, ExecutionModel};
use crate::header::{DefaultHeaderConverter, HeaderConverter};
use crate::registry::ServiceRegistry;
use crate::resolver::{DefaultErrorResolver, ErrorResolver};
use crate::route::{RouteTable, RuleCustomizer};

struct Inner {
    routes: RouteTable,
    executor: CallExecutor,
    config: TranscodingConfig,
}

/// A built gateway. Cheap to clone.
#[derive(Clone)]
pub struct TranscodingGateway {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for TranscodingGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranscodingGateway")
            .field("config", &self.inner.config)
            .field("routes", &self.inner.routes.routes().count())
            .finish()
    }
}

impl TranscodingGateway {
    /// Start building a gateway for the services in `registry`, calling them
    /// through `channel`.
    pub fn builder<C: RpcChannel>(registry: ServiceRegistry, channel: C) -> TranscodingGatewayBuilder {
        TranscodingGatewayBuilder::new(registry, Arc::new(channel))
    }

    /// An axum router serving every route of the gateway.
    ///
    /// The gateway installs itself as the router's fallback, so requests no
    /// route matches get an empty `404`. Merge it into an application router
    /// that has no fallback of its own.
    pub fn router<S>(&self) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        if !self.inner.config.enabled {
            return Router::new();
        }
        Router::new().fallback(handle).with_state(self.clone())
    }

    pub fn routes(&self) -> &RouteTable {
        &self.inner.routes
    }

    pub fn config(&self) -> &TranscodingConfig {
        &self.inner.config
    }

    pub fn channel(&self) -> &ManagedChannel {
        self.inner.executor.channel()
    }

    /// Shut the channel down, waiting up to the configured timeout for
    /// running calls. Returns `false` if calls had to be cancelled.
    pub async fn shutdown(&self) -> bool {
        self.channel()
            .shutdown(self.inner.config.shutdown_timeout)
            .await
    }
}

async fn handle(State(gateway): State<TranscodingGateway>, request: Request) -> Response {
    let inner = &gateway.inner;
    let Some(found) = inner
        .routes
        .lookup(request.method(), request.uri().path())
    else {
        return StatusCode::NOT_FOUND.into_response();
    };

    match inner.executor.execute(found, request).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

/// Builder for [`TranscodingGateway`].
pub struct TranscodingGatewayBuilder {
    registry: ServiceRegistry,
    channel: Arc<dyn RpcChannel>,
    config: TranscodingConfig,
    converter: Arc<dyn HeaderConverter>,
    resolver: Arc<dyn ErrorResolver>,
    customizers: Vec<Arc<dyn RuleCustomizer>>,
    overrides: HashMap<String, HttpRule>,
}

impl TranscodingGatewayBuilder {
    fn new(registry: ServiceRegistry, channel: Arc<dyn RpcChannel>) -> Self {
        Self {
            registry,
            channel,
            config: TranscodingConfig::default(),
            converter: Arc::new(DefaultHeaderConverter::new()),
            resolver: Arc::new(DefaultErrorResolver),
            customizers: Vec::new(),
            overrides: HashMap::new(),
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: TranscodingConfig) -> Self {
        self.config = config;
        self
    }

    /// Serve no routes when `false`.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.enabled = enabled;
        self
    }

    pub fn auto_mapping(mut self, enabled: bool) -> Self {
        self.config.auto_mapping = enabled;
        self
    }

    pub fn execution_model(mut self, model: ExecutionModel) -> Self {
        self.config.execution_model = model;
        self
    }

    pub fn print_options(mut self, options: PrintOptions) -> Self {
        self.config.print_options = options;
        self
    }

    /// Bound the route cache; `0` disables it.
    pub fn route_cache_capacity(mut self, capacity: usize) -> Self {
        self.config.route_cache_capacity = capacity;
        self
    }

    /// Limit request bodies; `None` removes the limit.
    pub fn max_body_size(mut self, limit: Option<usize>) -> Self {
        self.config.max_body_size = limit;
        self
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout = timeout;
        self
    }

    /// Deadline sent with every call.
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.config.call_timeout = Some(timeout);
        self
    }

    pub fn header_converter<H: HeaderConverter>(mut self, converter: H) -> Self {
        self.converter = Arc::new(converter);
        self
    }

    /// Render failed calls with `resolver` instead of the status table.
    pub fn error_resolver<E: ErrorResolver>(mut self, resolver: E) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    /// Add a hook that rewrites HTTP rules before routes are built.
    pub fn customizer<R: RuleCustomizer>(mut self, customizer: R) -> Self {
        self.customizers.push(Arc::new(customizer));
        self
    }

    /// Use `rule` for `method` (full name, e.g. `pkg.Service.Method`)
    /// instead of its `google.api.http` option.
    pub fn http_rule(mut self, method: impl Into<String>, rule: HttpRule) -> Self {
        self.overrides.insert(method.into(), rule);
        self
    }

    pub fn build(self) -> TranscodingGateway {
        for method in self.overrides.keys() {
            let known = self
                .registry
                .services()
                .iter()
                .flat_map(|service| service.methods())
                .any(|m| m.full_name() == method);
            if !known {
                tracing::warn!(method = %method, "http rule override for unknown method");
            }
        }

        let routes = RouteTable::build(
            &self.registry,
            &self.config,
            &self.customizers,
            &self.overrides,
        );
        let executor = CallExecutor::new(
            ManagedChannel::from_arc(self.channel),
            self.converter,
            self.resolver,
            self.config.clone(),
        );

        TranscodingGateway {
            inner: Arc::new(Inner {
                routes,
                executor,
                config: self.config,
            }),
        }
    }
}
