//! Route table: which RPC method serves an HTTP method and path.
//!
//! Routes come from `google.api.http` rules (or explicit overrides) and are
//! scanned in registration order, first match wins. With auto-mapping on,
//! every method is also reachable as `POST /{package.Service}/{Method}`
//! through an exact-key map that is consulted before the scan.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use grpc_transcoding_core::{BODY_WILDCARD, HttpRule, PathTemplate};
use http::Method;
use prost_reflect::{MessageDescriptor, MethodDescriptor};

use crate::config::TranscodingConfig;
use crate::registry::ServiceRegistry;

/// Hook to rewrite a method's HTTP rule before routes are built.
///
/// Any `Fn(&MethodDescriptor, HttpRule) -> HttpRule` closure works.
pub trait RuleCustomizer: Send + Sync + 'static {
    fn customize(&self, method: &MethodDescriptor, rule: HttpRule) -> HttpRule;
}

impl<F> RuleCustomizer for F
where
    F: Fn(&MethodDescriptor, HttpRule) -> HttpRule + Send + Sync + 'static,
{
    fn customize(&self, method: &MethodDescriptor, rule: HttpRule) -> HttpRule {
        self(method, rule)
    }
}

/// One HTTP method + path template pair and its body mapping.
#[derive(Clone, Debug)]
pub struct Binding {
    method: Method,
    template: PathTemplate,
    body: Option<String>,
    response_body: Option<String>,
}

impl Binding {
    fn from_rule(rule: &HttpRule) -> Option<Result<Self, grpc_transcoding_core::TemplateError>> {
        let (method, path) = rule.method_and_path()?;
        Some(PathTemplate::parse(path).map(|template| Self {
            method,
            template,
            body: rule.body_selector().map(str::to_owned),
            response_body: rule.response_body_selector().map(str::to_owned),
        }))
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn template(&self) -> &PathTemplate {
        &self.template
    }

    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    pub fn response_body(&self) -> Option<&str> {
        self.response_body.as_deref()
    }
}

/// An RPC method and the bindings that reach it. Index 0 is the primary
/// binding, the rest come from `additional_bindings`.
#[derive(Debug)]
pub struct Route {
    method: MethodDescriptor,
    bindings: Vec<Binding>,
}

impl Route {
    pub fn method(&self) -> &MethodDescriptor {
        &self.method
    }

    pub fn input(&self) -> MessageDescriptor {
        self.method.input()
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }
}

/// The result of a successful lookup.
#[derive(Clone, Debug)]
pub struct RouteMatch {
    route: Arc<Route>,
    binding: usize,
    variables: HashMap<String, String>,
}

impl RouteMatch {
    pub fn route(&self) -> &Arc<Route> {
        &self.route
    }

    pub fn binding(&self) -> &Binding {
        &self.route.bindings[self.binding]
    }

    pub fn path_variables(&self) -> &HashMap<String, String> {
        &self.variables
    }

    pub fn into_path_variables(self) -> HashMap<String, String> {
        self.variables
    }
}

/// Memoized scan results keyed by `(method, normalized path)`.
///
/// The map is cleared when it reaches capacity; a capacity of zero disables
/// caching.
#[derive(Debug)]
struct RouteCache {
    entries: DashMap<(Method, String), RouteMatch>,
    capacity: usize,
}

impl RouteCache {
    fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity,
        }
    }

    fn get(&self, key: &(Method, String)) -> Option<RouteMatch> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    fn insert(&self, key: (Method, String), value: RouteMatch) {
        if self.capacity == 0 {
            return;
        }
        let len = self.len();
        if len >= self.capacity {
            tracing::debug!(entries = len, "route cache full, cleared");
            self.entries.clear();
        }
        self.entries.insert(key, value);
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// All routes of a gateway, built once.
#[derive(Debug)]
pub struct RouteTable {
    routes: Vec<Arc<Route>>,
    auto: HashMap<String, Arc<Route>>,
    cache: RouteCache,
}

impl RouteTable {
    /// Build routes for every method in `registry`.
    ///
    /// A rule in `overrides` (keyed by the method's full name, e.g.
    /// `pkg.Svc.Method`) takes precedence over the method's
    /// `google.api.http` option. Customizers run in order on whichever rule
    /// was found.
    pub fn build(
        registry: &ServiceRegistry,
        config: &TranscodingConfig,
        customizers: &[Arc<dyn RuleCustomizer>],
        overrides: &HashMap<String, HttpRule>,
    ) -> Self {
        let mut routes = Vec::new();
        let mut auto = HashMap::new();

        for service in registry.services() {
            for method in service.methods() {
                let rule = overrides
                    .get(method.full_name())
                    .cloned()
                    .or_else(|| registry.http_rule(&method))
                    .map(|rule| {
                        customizers
                            .iter()
                            .fold(rule, |rule, customizer| customizer.customize(&method, rule))
                    });

                if let Some(rule) = rule {
                    let bindings = bindings_for(&method, &rule);
                    if !bindings.is_empty() {
                        for binding in &bindings {
                            tracing::debug!(
                                method = method.full_name(),
                                http_method = %binding.method,
                                template = %binding.template,
                                "route registered"
                            );
                        }
                        routes.push(Arc::new(Route {
                            method: method.clone(),
                            bindings,
                        }));
                    }
                }

                if config.auto_mapping {
                    let key = format!("{}/{}", service.full_name(), method.name());
                    match PathTemplate::parse(&format!("/{key}")) {
                        Ok(template) => {
                            let binding = Binding {
                                method: Method::POST,
                                template,
                                body: Some(BODY_WILDCARD.to_owned()),
                                response_body: None,
                            };
                            tracing::debug!(method = method.full_name(), path = %binding.template, "auto-mapped route registered");
                            auto.insert(
                                key,
                                Arc::new(Route {
                                    method: method.clone(),
                                    bindings: vec![binding],
                                }),
                            );
                        }
                        Err(err) => {
                            tracing::warn!(method = method.full_name(), error = %err, "cannot auto-map method");
                        }
                    }
                }
            }
        }

        Self {
            routes,
            auto,
            cache: RouteCache::new(config.route_cache_capacity),
        }
    }

    /// Find the route for a request.
    pub fn lookup(&self, method: &Method, path: &str) -> Option<RouteMatch> {
        let normalized = path.trim_matches('/');

        if method == Method::POST {
            if let Some(route) = self.auto.get(normalized) {
                return Some(RouteMatch {
                    route: route.clone(),
                    binding: 0,
                    variables: HashMap::new(),
                });
            }
        }

        let key = (method.clone(), normalized.to_owned());
        if let Some(found) = self.cache.get(&key) {
            return Some(found);
        }

        let found = self.scan(method, normalized)?;
        self.cache.insert(key, found.clone());
        Some(found)
    }

    fn scan(&self, method: &Method, path: &str) -> Option<RouteMatch> {
        self.routes.iter().find_map(|route| {
            route
                .bindings
                .iter()
                .enumerate()
                .filter(|(_, binding)| binding.method == method)
                .find_map(|(index, binding)| {
                    binding.template.matches(path).map(|variables| RouteMatch {
                        route: route.clone(),
                        binding: index,
                        variables,
                    })
                })
        })
    }

    /// Routes built from HTTP rules, in scan order.
    pub fn routes(&self) -> impl Iterator<Item = &Arc<Route>> {
        self.routes.iter()
    }

    /// Auto-mapped keys (`package.Service/Method`) and their routes.
    pub fn auto_mapped(&self) -> impl Iterator<Item = (&str, &Arc<Route>)> {
        self.auto.iter().map(|(key, route)| (key.as_str(), route))
    }
}

/// The primary binding plus one level of additional bindings; nested
/// additional bindings are ignored.
///
/// Each additional binding keeps its own `body` and `response_body`
/// selectors rather than inheriting the primary rule's.
fn bindings_for(method: &MethodDescriptor, rule: &HttpRule) -> Vec<Binding> {
    std::iter::once(rule)
        .chain(rule.additional_bindings.iter())
        .filter_map(|rule| match Binding::from_rule(rule) {
            Some(Ok(binding)) => Some(binding),
            Some(Err(err)) => {
                tracing::warn!(method = method.full_name(), error = %err, "invalid path template, binding skipped");
                None
            }
            None => {
                tracing::warn!(method = method.full_name(), "http rule without a pattern, binding skipped");
                None
            }
        })
        .collect()
}
