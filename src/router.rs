//! Route table.
//!
//! Routes are tried in registration order. A route matches on path
//! pattern and required headers; its method table then picks the action.
//! Header-constrained routes sharing a path can't be expressed in axum's
//! router, so the table is resolved by hand from a fallback handler.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use axum::http::{HeaderMap, Method};

use crate::config::{Configuration, Endpoint, Proxy};
use crate::endpoint::EndpointHandler;
use crate::error::{MockError, Result};
use crate::matcher::{headers_match, PathPattern};
use crate::proxy::ProxyForwarder;
use crate::template::TemplateRenderer;

/// Path of the generated schema document.
pub const SCHEMA_PATH: &str = "/api.json";

/// Path of the metrics snapshot.
pub const METRICS_PATH: &str = "/metrics";

/// What a matched route does.
#[derive(Clone)]
pub enum Action {
    /// List a collection's records.
    ListRecords(String),
    /// Append a record to a collection.
    CreateRecord(String),
    /// Fetch one record by id.
    GetRecord(String),
    /// Replace one record by id.
    UpdateRecord(String),
    /// Remove one record by id.
    DeleteRecord(String),
    /// Render a simulated endpoint.
    Endpoint(Arc<EndpointHandler>),
    /// Forward to a proxy target.
    Proxy(Arc<ProxyForwarder>),
    /// Serve the schema document.
    Schema,
    /// Serve the metrics snapshot.
    Metrics,
}

impl Action {
    /// Whether requests handled by this action are counted.
    pub fn records_metrics(&self) -> bool {
        !matches!(self, Self::Schema | Self::Metrics)
    }
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ListRecords(name) => f.debug_tuple("ListRecords").field(name).finish(),
            Self::CreateRecord(name) => f.debug_tuple("CreateRecord").field(name).finish(),
            Self::GetRecord(name) => f.debug_tuple("GetRecord").field(name).finish(),
            Self::UpdateRecord(name) => f.debug_tuple("UpdateRecord").field(name).finish(),
            Self::DeleteRecord(name) => f.debug_tuple("DeleteRecord").field(name).finish(),
            Self::Endpoint(handler) => f
                .debug_tuple("Endpoint")
                .field(&handler.endpoint().name)
                .finish(),
            Self::Proxy(forwarder) => f
                .debug_tuple("Proxy")
                .field(&forwarder.proxy().target)
                .finish(),
            Self::Schema => f.write_str("Schema"),
            Self::Metrics => f.write_str("Metrics"),
        }
    }
}

/// What kind of configuration entry a route came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteKind {
    /// `/{collection}`
    Collection(String),
    /// `/{collection}/{id}`
    Element(String),
    /// A simulated endpoint, by name.
    Endpoint(String),
    /// A proxy rule.
    Proxy,
    /// Schema or metrics.
    Builtin,
}

/// One registered route.
#[derive(Debug, Clone)]
pub struct Route {
    pattern: PathPattern,
    headers: BTreeMap<String, String>,
    handlers: Vec<(Method, Action)>,
    any: Option<Action>,
    kind: RouteKind,
}

impl Route {
    /// Create a route with an empty method table.
    pub fn new(pattern: PathPattern, kind: RouteKind) -> Self {
        Self {
            pattern,
            headers: BTreeMap::new(),
            handlers: Vec::new(),
            any: None,
            kind,
        }
    }

    /// Require headers with exact values.
    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    /// Handle `method` with `action`.
    pub fn on(mut self, method: Method, action: Action) -> Self {
        self.handlers.push((method, action));
        self
    }

    /// Handle every method with `action`.
    pub fn any(mut self, action: Action) -> Self {
        self.any = Some(action);
        self
    }

    /// The path pattern.
    pub fn pattern(&self) -> &PathPattern {
        &self.pattern
    }

    /// Required headers.
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// Methods with an explicit handler, in registration order.
    pub fn methods(&self) -> impl Iterator<Item = &Method> {
        self.handlers.iter().map(|(method, _)| method)
    }

    /// Whether every method is accepted.
    pub fn accepts_any_method(&self) -> bool {
        self.any.is_some()
    }

    /// Where this route came from.
    pub fn kind(&self) -> &RouteKind {
        &self.kind
    }

    fn action_for(&self, method: &Method) -> Option<&Action> {
        self.handlers
            .iter()
            .find(|(m, _)| m == method)
            .map(|(_, action)| action)
            .or(self.any.as_ref())
    }
}

/// Result of resolving a request against the table.
#[derive(Debug)]
pub enum Resolution {
    /// A route accepted the request.
    Matched {
        /// Action to run.
        action: Action,
        /// Captured path variables.
        params: HashMap<String, String>,
    },
    /// Some route matched path and headers but none accepted the method.
    MethodNotAllowed,
    /// Nothing matched.
    NotFound,
}

/// Ordered list of routes.
#[derive(Debug, Default, Clone)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a route.
    pub fn push(&mut self, route: Route) {
        self.routes.push(route);
    }

    /// Registered routes, in order.
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Find the action for a request. `path` is relative to the mock prefix.
    pub fn resolve(&self, method: &Method, path: &str, headers: &HeaderMap) -> Resolution {
        let mut method_mismatch = false;
        for route in &self.routes {
            let Some(params) = route.pattern.captures(path) else {
                continue;
            };
            if !headers_match(&route.headers, headers) {
                continue;
            }
            match route.action_for(method) {
                Some(action) => {
                    return Resolution::Matched {
                        action: action.clone(),
                        params,
                    }
                }
                None => method_mismatch = true,
            }
        }

        if method_mismatch {
            Resolution::MethodNotAllowed
        } else {
            Resolution::NotFound
        }
    }
}

/// Build the route table for a configuration.
///
/// Registration order is collections, endpoints, proxies, then the
/// built-in schema and (optionally) metrics routes.
pub fn build_routes(
    config: &Configuration,
    renderer: Arc<dyn TemplateRenderer>,
    client: reqwest::Client,
    expose_metrics: bool,
) -> Result<RouteTable> {
    let mut table = RouteTable::new();

    for collection in &config.collections {
        let name = collection.name.clone();
        table.push(
            Route::new(
                parse_pattern(&format!("/{name}"))?,
                RouteKind::Collection(name.clone()),
            )
            .on(Method::GET, Action::ListRecords(name.clone()))
            .on(Method::POST, Action::CreateRecord(name.clone())),
        );
        table.push(
            Route::new(
                parse_pattern(&format!("/{name}/{{name}}"))?,
                RouteKind::Element(name.clone()),
            )
            .on(Method::GET, Action::GetRecord(name.clone()))
            .on(Method::PUT, Action::UpdateRecord(name.clone()))
            .on(Method::DELETE, Action::DeleteRecord(name)),
        );
    }

    for endpoint in &config.endpoints {
        table.push(endpoint_route(endpoint, renderer.clone(), client.clone())?);
    }

    for proxy in &config.proxies {
        table.push(proxy_route(proxy, renderer.clone(), client.clone())?);
    }

    table.push(
        Route::new(parse_pattern(SCHEMA_PATH)?, RouteKind::Builtin).on(Method::GET, Action::Schema),
    );
    if expose_metrics {
        table.push(
            Route::new(parse_pattern(METRICS_PATH)?, RouteKind::Builtin)
                .on(Method::GET, Action::Metrics),
        );
    }

    Ok(table)
}

fn endpoint_route(
    endpoint: &Endpoint,
    renderer: Arc<dyn TemplateRenderer>,
    client: reqwest::Client,
) -> Result<Route> {
    let methods = endpoint
        .request
        .methods()
        .map_err(|e| MockError::InvalidConfig(format!("endpoint {}: {e}", endpoint.name)))?;
    let handler = Arc::new(EndpointHandler::new(endpoint.clone(), renderer, client));

    let mut route = Route::new(
        parse_pattern(&endpoint.request.path)?,
        RouteKind::Endpoint(endpoint.name.clone()),
    )
    .with_headers(endpoint.request.header.clone());
    for method in methods {
        route = route.on(method, Action::Endpoint(handler.clone()));
    }
    Ok(route)
}

fn proxy_route(
    proxy: &Proxy,
    renderer: Arc<dyn TemplateRenderer>,
    client: reqwest::Client,
) -> Result<Route> {
    let forwarder = Arc::new(ProxyForwarder::new(proxy.clone(), renderer, client));
    Ok(Route::new(parse_pattern(&proxy.path)?, RouteKind::Proxy).any(Action::Proxy(forwarder)))
}

fn parse_pattern(path: &str) -> Result<PathPattern> {
    PathPattern::parse(path)
        .map_err(|e| MockError::InvalidConfig(format!("invalid path pattern {path:?}: {e}")))
}
