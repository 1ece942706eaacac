//! Reverse-proxy rules.
//!
//! Forwards a request to a templated target and relays the upstream
//! response unchanged apart from hop-by-hop headers.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use axum::body::Body;
use axum::http::{HeaderMap, Method};
use axum::response::Response;
use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::Proxy;
use crate::error::RequestError;
use crate::matcher::parse_query_string;
use crate::template::TemplateRenderer;

/// Headers never copied between client and upstream.
pub static HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

/// Check if a header is dropped when forwarding.
pub fn is_hop_by_hop(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    HOP_BY_HOP_HEADERS.contains(&name.as_str())
}

fn filter_headers(headers: &HeaderMap) -> HeaderMap {
    let mut filtered = HeaderMap::new();
    for (name, value) in headers {
        if !is_hop_by_hop(name.as_str()) {
            filtered.append(name.clone(), value.clone());
        }
    }
    filtered
}

/// Remove `prefix` from `path` on a segment boundary.
///
/// The result always starts with `/`. A path that only shares characters
/// with the prefix, like `/v1beta` under `/v1`, is kept whole.
fn strip_path_prefix<'a>(path: &'a str, prefix: &str) -> Cow<'a, str> {
    let prefix = prefix.trim_end_matches('/');
    let rest = match path.strip_prefix(prefix) {
        Some(rest) if !prefix.is_empty() && (rest.is_empty() || rest.starts_with('/')) => rest,
        _ => path,
    };
    if rest.starts_with('/') {
        Cow::Borrowed(rest)
    } else {
        Cow::Owned(format!("/{rest}"))
    }
}

/// A request to forward.
#[derive(Debug)]
pub struct ForwardRequest {
    /// HTTP method.
    pub method: Method,
    /// Path relative to the mock prefix.
    pub path: String,
    /// Raw query string.
    pub query: Option<String>,
    /// Request headers.
    pub headers: HeaderMap,
    /// Request body.
    pub body: Bytes,
    /// Variables captured by the proxy path pattern.
    pub params: HashMap<String, String>,
}

/// Context the target template is rendered against.
#[derive(Debug, Serialize)]
struct TargetContext<'a> {
    method: &'a str,
    path: &'a str,
    query: HashMap<String, String>,
    header: BTreeMap<String, String>,
    param: &'a HashMap<String, String>,
}

/// Forwards requests matching one proxy rule.
pub struct ProxyForwarder {
    proxy: Proxy,
    renderer: Arc<dyn TemplateRenderer>,
    client: reqwest::Client,
}

impl ProxyForwarder {
    /// Create a forwarder for `proxy`.
    pub fn new(proxy: Proxy, renderer: Arc<dyn TemplateRenderer>, client: reqwest::Client) -> Self {
        Self {
            proxy,
            renderer,
            client,
        }
    }

    /// The proxy rule.
    pub fn proxy(&self) -> &Proxy {
        &self.proxy
    }

    /// Compute the upstream URL for a request.
    pub fn target_url(&self, request: &ForwardRequest) -> Result<String, RequestError> {
        let header = request
            .headers
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .collect();
        let context = serde_json::to_value(TargetContext {
            method: request.method.as_str(),
            path: &request.path,
            query: parse_query_string(request.query.as_deref().unwrap_or("")),
            header,
            param: &request.params,
        })
        .map_err(|e| RequestError::Internal(e.to_string()))?;

        let target = self
            .renderer
            .render("proxy target", &self.proxy.target, &context)
            .map_err(|e| RequestError::BadRequest(e.to_string()))?;

        let path = strip_path_prefix(&request.path, &self.proxy.prefix);
        let mut url = format!("{}{}", target.trim_end_matches('/'), path);
        if let Some(query) = request.query.as_deref().filter(|q| !q.is_empty()) {
            url.push('?');
            url.push_str(query);
        }
        Ok(url)
    }

    /// Forward the request and relay the upstream response.
    pub async fn forward(&self, request: ForwardRequest) -> Result<Response, RequestError> {
        let url = self.target_url(&request)?;
        debug!(method = %request.method, url = %url, "Forwarding proxied request");

        let upstream = self
            .client
            .request(request.method.clone(), &url)
            .headers(filter_headers(&request.headers))
            .body(request.body)
            .send()
            .await
            .map_err(|e| {
                warn!(url = %url, error = %e, "Proxy request failed");
                RequestError::Upstream(format!("proxy request to {url} failed: {e}"))
            })?;

        let status = upstream.status();
        let headers = filter_headers(upstream.headers());
        let body = upstream.bytes().await.map_err(|e| {
            warn!(url = %url, error = %e, "Failed to read proxied response");
            RequestError::Upstream(format!("failed to read response from {url}: {e}"))
        })?;

        let mut response = Response::new(Body::from(body));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}
