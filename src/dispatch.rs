//! Request dispatch.
//!
//! One axum fallback handler strips the mock prefix, resolves the route
//! table, and runs the matched action.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::{to_bytes, Body, Bytes};
use axum::extract::{Request, State};
use axum::http::header::{CONTENT_TYPE, HOST};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::config::Collection;
use crate::error::RequestError;
use crate::matcher::parse_query_string;
use crate::metrics::RequestMetrics;
use crate::proxy::ForwardRequest;
use crate::router::{Action, Resolution, RouteTable};
use crate::schema::build_document;
use crate::store::{Record, RecordStore};

/// Largest request body read into memory.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Shared state of the fallback handler.
pub struct Dispatcher {
    prefix: String,
    routes: RouteTable,
    collections: Vec<Collection>,
    store: Arc<RecordStore>,
    metrics: Arc<dyn RequestMetrics>,
}

impl Dispatcher {
    /// Create a dispatcher serving `routes` under `prefix`.
    pub fn new(
        prefix: &str,
        routes: RouteTable,
        collections: Vec<Collection>,
        store: Arc<RecordStore>,
        metrics: Arc<dyn RequestMetrics>,
    ) -> Self {
        Self {
            prefix: normalize_prefix(prefix),
            routes,
            collections,
            store,
            metrics,
        }
    }

    /// Wrap the dispatcher in an axum router.
    pub fn into_router(self) -> Router {
        Router::new()
            .fallback(handle)
            .with_state(Arc::new(self))
            .layer(TraceLayer::new_for_http())
    }

    /// Path relative to the prefix, or `None` when outside it.
    fn relative_path<'a>(&self, path: &'a str) -> Option<&'a str> {
        let rest = path.strip_prefix(self.prefix.as_str())?;
        match rest {
            "" => Some("/"),
            rest if rest.starts_with('/') => Some(rest),
            _ => None,
        }
    }

    async fn dispatch(&self, request: Request) -> Result<Response, RequestError> {
        let (parts, body) = request.into_parts();
        let path = self
            .relative_path(parts.uri.path())
            .ok_or_else(|| RequestError::NotFound(format!("no route for {}", parts.uri.path())))?
            .to_string();

        let (action, params) = match self.routes.resolve(&parts.method, &path, &parts.headers) {
            Resolution::Matched { action, params } => (action, params),
            Resolution::MethodNotAllowed => return Err(RequestError::MethodNotAllowed),
            Resolution::NotFound => {
                return Err(RequestError::NotFound(format!("no route for {path}")))
            }
        };
        debug!(method = %parts.method, path = %path, action = ?action, "Dispatching request");
        if action.records_metrics() {
            self.metrics.record_request(&path);
        }

        let body = to_bytes(body, MAX_BODY_BYTES)
            .await
            .map_err(|e| RequestError::BadRequest(format!("failed to read body: {e}")))?;

        match action {
            Action::ListRecords(name) => {
                let filters = parse_query_string(parts.uri.query().unwrap_or(""));
                let records = self.store.list(&name, &filters).await?;
                json_response(&records)
            }
            Action::CreateRecord(name) => {
                let record = decode_record(&body)?;
                self.store.create(&name, record).await?;
                Ok(raw_json_response(body))
            }
            Action::GetRecord(name) => {
                let record = self.store.get(&name, record_id(&params)?).await?;
                json_response(&record)
            }
            Action::UpdateRecord(name) => {
                let record = decode_record(&body)?;
                self.store.update(&name, record_id(&params)?, record).await?;
                Ok(raw_json_response(body))
            }
            Action::DeleteRecord(name) => {
                let record = self.store.delete(&name, record_id(&params)?).await?;
                json_response(&record)
            }
            Action::Endpoint(handler) => {
                let host = parts
                    .headers
                    .get(HOST)
                    .and_then(|v| v.to_str().ok())
                    .or_else(|| parts.uri.authority().map(|a| a.as_str()));
                handler.handle(params, host).await
            }
            Action::Proxy(forwarder) => {
                forwarder
                    .forward(ForwardRequest {
                        method: parts.method,
                        path,
                        query: parts.uri.query().map(String::from),
                        headers: parts.headers,
                        body,
                        params,
                    })
                    .await
            }
            Action::Schema => {
                let document = build_document(&self.routes, &self.collections);
                json_response(&document)
            }
            Action::Metrics => Ok(Json(self.metrics.snapshot()).into_response()),
        }
    }
}

async fn handle(State(dispatcher): State<Arc<Dispatcher>>, request: Request) -> Response {
    dispatcher
        .dispatch(request)
        .await
        .unwrap_or_else(IntoResponse::into_response)
}

/// Normalize a mock prefix to `/segment` form, or empty for the root.
pub fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

fn record_id(params: &HashMap<String, String>) -> Result<&str, RequestError> {
    params
        .get("name")
        .map(String::as_str)
        .ok_or_else(|| RequestError::Internal("missing record id".to_string()))
}

fn decode_record(body: &[u8]) -> Result<Record, RequestError> {
    serde_json::from_slice(body).map_err(|e| RequestError::BadRequest(e.to_string()))
}

fn json_response<T: Serialize>(value: &T) -> Result<Response, RequestError> {
    let data = serde_json::to_vec(value).map_err(|e| RequestError::Internal(e.to_string()))?;
    Ok(raw_json_response(Bytes::from(data)))
}

fn raw_json_response(body: Bytes) -> Response {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = StatusCode::OK;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use crate::metrics::InMemoryMetrics;
    use crate::router::build_routes;
    use crate::template::TemplateEngine;
    use axum::http::Method;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    const CONFIG: &str = r#"
collections:
  - name: team
    sample: '{"name": "someone"}'
endpoints:
  - name: hello
    request:
      path: /hello/{who}
    response:
      body: 'hi {{param.who}} at {{param.Host}}'
"#;

    fn router(prefix: &str) -> (Router, Arc<InMemoryMetrics>) {
        let config = Configuration::from_yaml(CONFIG.as_bytes()).unwrap();
        let renderer = Arc::new(TemplateEngine::new());
        let store = RecordStore::seeded(&config.collections, renderer.as_ref()).unwrap();
        let metrics = Arc::new(InMemoryMetrics::new());
        let routes = build_routes(&config, renderer, reqwest::Client::new(), true).unwrap();
        let dispatcher = Dispatcher::new(
            prefix,
            routes,
            config.collections,
            Arc::new(store),
            metrics.clone(),
        );
        (dispatcher.into_router(), metrics)
    }

    async fn send(router: &Router, method: Method, uri: &str, body: &str) -> (StatusCode, Bytes) {
        let request = axum::http::Request::builder()
            .method(method)
            .uri(uri)
            .header(HOST, "localhost:6060")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        (status, to_bytes(response.into_body(), usize::MAX).await.unwrap())
    }

    #[test]
    fn test_normalize_prefix() {
        assert_eq!(normalize_prefix("/mock"), "/mock");
        assert_eq!(normalize_prefix("mock/"), "/mock");
        assert_eq!(normalize_prefix("/"), "");
        assert_eq!(normalize_prefix(""), "");
    }

    #[tokio::test]
    async fn test_prefix_boundary() {
        let (router, _) = router("/mock");
        let (status, _) = send(&router, Method::GET, "/mock/team", "").await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(&router, Method::GET, "/mockery/team", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&router, Method::GET, "/team", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_create_echoes_body_and_rejects_garbage() {
        let (router, _) = router("");
        let (status, body) =
            send(&router, Method::POST, "/team", r#"{"name":"test","members":[]}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], br#"{"name":"test","members":[]}"#);

        let (status, body) = send(&router, Method::POST, "/team", "not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(!body.is_empty());

        let (status, _) = send(&router, Method::POST, "/team", "[1]").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_delete_returns_removed_record() {
        let (router, _) = router("");
        let (status, body) = send(&router, Method::DELETE, "/team/someone", "").await;
        assert_eq!(status, StatusCode::OK);
        let removed: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(removed, json!({"name": "someone"}));

        let (status, _) = send(&router, Method::GET, "/team/someone", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_endpoint_sees_host() {
        let (router, _) = router("");
        let (status, body) = send(&router, Method::GET, "/hello/rick", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], b"hi rick at localhost:6060");
    }

    #[tokio::test]
    async fn test_metrics_count_handled_routes_only() {
        let (router, metrics) = router("");
        send(&router, Method::GET, "/team", "").await;
        send(&router, Method::GET, "/team", "").await;
        send(&router, Method::GET, "/hello/a", "").await;
        send(&router, Method::GET, "/api.json", "").await;
        send(&router, Method::GET, "/missing", "").await;

        let data = metrics.snapshot();
        assert_eq!(data.requests.get("/team"), Some(&2));
        assert_eq!(data.requests.get("/hello/a"), Some(&1));
        assert_eq!(data.requests.len(), 2);

        let (status, body) = send(&router, Method::GET, "/metrics", "").await;
        assert_eq!(status, StatusCode::OK);
        let snapshot: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(snapshot["requests"]["/team"], 2);
    }
}
