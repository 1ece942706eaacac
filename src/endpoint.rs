//! Simulated endpoint responses.
//!
//! Each request renders headers and body from an immutable per-request
//! context, so concurrent requests to one endpoint share nothing mutable.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use axum::body::Body;
use axum::http::header::CONTENT_LENGTH;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::Response;
use base64::Engine;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{Encoder, Endpoint, RequestMatcher, ResponseTemplate};
use crate::error::RequestError;
use crate::template::TemplateRenderer;

/// Name of the header identifying this server on endpoint responses.
pub const SERVER_SIGNATURE_HEADER: &str = "mock-server";

/// Value of [`SERVER_SIGNATURE_HEADER`].
pub fn server_signature() -> String {
    format!("{}: {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}

/// Context an endpoint's templates are rendered against.
#[derive(Debug, Serialize)]
struct EndpointContext<'a> {
    name: &'a str,
    request: &'a RequestMatcher,
    response: &'a ResponseTemplate,
    param: BTreeMap<String, String>,
}

/// Generates responses for one configured endpoint.
pub struct EndpointHandler {
    endpoint: Endpoint,
    renderer: Arc<dyn TemplateRenderer>,
    client: reqwest::Client,
}

impl EndpointHandler {
    /// Create a handler for `endpoint`.
    pub fn new(
        endpoint: Endpoint,
        renderer: Arc<dyn TemplateRenderer>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            endpoint,
            renderer,
            client,
        }
    }

    /// The endpoint definition.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Build the response for one request.
    ///
    /// `params` are the matched path variables; `host` becomes the `Host`
    /// parameter.
    pub async fn handle(
        &self,
        params: HashMap<String, String>,
        host: Option<&str>,
    ) -> Result<Response, RequestError> {
        let response = &self.endpoint.response;
        info!(
            name = %self.endpoint.name,
            path = %self.endpoint.request.path,
            encoder = ?response.encoder,
            "Receiving mock request"
        );

        let mut param: BTreeMap<String, String> = params.into_iter().collect();
        param.insert("Host".to_string(), host.unwrap_or_default().to_string());
        let context = serde_json::to_value(EndpointContext {
            name: &self.endpoint.name,
            request: &self.endpoint.request,
            response,
            param,
        })
        .map_err(|e| RequestError::Internal(e.to_string()))?;

        let mut headers = response.header.clone();
        headers.insert(SERVER_SIGNATURE_HEADER.to_string(), server_signature());

        let body = self.resolve_body(&context).await?;

        let status = match response.status_code {
            0 => StatusCode::OK,
            code => StatusCode::from_u16(code)
                .map_err(|e| RequestError::Internal(e.to_string()))?,
        };

        let mut reply = Response::new(Body::empty());
        *reply.status_mut() = status;
        for (name, template) in &headers {
            let value = self.render_header(name, template, &context);
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(&value),
            ) {
                (Ok(name), Ok(value)) => {
                    reply.headers_mut().insert(name, value);
                }
                _ => warn!(header = %name, value = %value, "Skipping invalid response header"),
            }
        }
        reply
            .headers_mut()
            .insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
        *reply.body_mut() = Body::from(body);
        Ok(reply)
    }

    /// Render one header value, keeping the literal on failure.
    fn render_header(&self, name: &str, template: &str, context: &serde_json::Value) -> String {
        match self.renderer.render("mock-server-header", template, context) {
            Ok(value) => value,
            Err(e) => {
                warn!(header = %name, error = %e, "Failed to render header, using literal value");
                template.to_string()
            }
        }
    }

    async fn resolve_body(&self, context: &serde_json::Value) -> Result<Vec<u8>, RequestError> {
        let text = &self.endpoint.response.body;
        match self.endpoint.response.encoder {
            Encoder::Base64 => base64::engine::general_purpose::STANDARD
                .decode(text.trim())
                .map_err(|e| RequestError::BadRequest(format!("invalid base64 body: {e}"))),
            Encoder::Url => self.fetch(text.trim()).await,
            Encoder::Raw => self
                .renderer
                .render_bytes("start-item", text, context)
                .map_err(|e| RequestError::BadRequest(e.to_string())),
        }
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, RequestError> {
        debug!(url = %url, "Fetching endpoint body");
        let response = self.client.get(url).send().await.map_err(|e| {
            warn!(url = %url, error = %e, "Failed to fetch endpoint body");
            RequestError::Upstream(format!("failed to fetch {url}: {e}"))
        })?;
        let bytes = response.bytes().await.map_err(|e| {
            warn!(url = %url, error = %e, "Failed to read fetched body");
            RequestError::Upstream(format!("failed to read body from {url}: {e}"))
        })?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::TemplateEngine;
    use axum::body::to_bytes;

    fn handler(response: ResponseTemplate) -> EndpointHandler {
        let endpoint = Endpoint {
            name: "repo".to_string(),
            request: RequestMatcher {
                path: "/repos/{name}".to_string(),
                ..RequestMatcher::default()
            },
            response,
        };
        EndpointHandler::new(
            endpoint,
            Arc::new(TemplateEngine::new()),
            reqwest::Client::new(),
        )
    }

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_renders_body_and_headers() {
        let mut header = BTreeMap::new();
        header.insert("x-repo".to_string(), "{{param.name}}".to_string());
        header.insert("x-broken".to_string(), "{{#if}}".to_string());
        let handler = handler(ResponseTemplate {
            body: r#"{"repo": "{{param.name}}", "host": "{{param.Host}}", "by": "{{name}}"}"#
                .to_string(),
            header,
            ..ResponseTemplate::default()
        });

        let response = handler
            .handle(params(&[("name", "linux")]), Some("localhost:6060"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-repo"], "linux");
        assert_eq!(response.headers()["x-broken"], "{{#if}}");
        assert_eq!(
            response.headers()[SERVER_SIGNATURE_HEADER],
            server_signature().as_str()
        );
        let expected = r#"{"repo": "linux", "host": "localhost:6060", "by": "repo"}"#;
        assert_eq!(
            response.headers()[CONTENT_LENGTH],
            expected.len().to_string().as_str()
        );
        assert_eq!(body_text(response).await, expected);
    }

    #[tokio::test]
    async fn test_declared_status_code() {
        let handler = handler(ResponseTemplate {
            body: "created".to_string(),
            status_code: 201,
            ..ResponseTemplate::default()
        });
        let response = handler.handle(HashMap::new(), None).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_base64_encoder() {
        let handler = handler(ResponseTemplate {
            encoder: Encoder::Base64,
            body: "aGVsbG8=".to_string(),
            ..ResponseTemplate::default()
        });
        let response = handler.handle(HashMap::new(), None).await.unwrap();
        assert_eq!(body_text(response).await, "hello");
    }

    #[tokio::test]
    async fn test_invalid_base64_is_bad_request() {
        let handler = handler(ResponseTemplate {
            encoder: Encoder::Base64,
            body: "not base64!".to_string(),
            ..ResponseTemplate::default()
        });
        let err = handler.handle(HashMap::new(), None).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_render_failure_is_bad_request() {
        let handler = handler(ResponseTemplate {
            body: "{{#each}}".to_string(),
            ..ResponseTemplate::default()
        });
        let err = handler.handle(HashMap::new(), None).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unreachable_fetch_url_is_upstream_error() {
        let handler = handler(ResponseTemplate {
            encoder: Encoder::Url,
            body: "http://127.0.0.1:1/unreachable".to_string(),
            ..ResponseTemplate::default()
        });
        let err = handler.handle(HashMap::new(), None).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
