//! Scheduled outbound webhooks.
//!
//! Every scheduled webhook runs in its own task: sleep for the period,
//! fire once, repeat. A firing is awaited before the next sleep starts,
//! so firings never overlap. Both waits end early on shutdown.

use std::sync::Arc;
use std::time::Duration;

use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::{Webhook, WebhookRequest};
use crate::error::{MockError, Result};
use crate::shutdown::{ShutdownListener, ShutdownSignal};
use crate::store::{Record, RecordStore};
use crate::template::TemplateRenderer;

/// Engine state exposed to webhook path templates.
#[derive(Debug, Serialize)]
struct EngineState {
    collections: std::collections::BTreeMap<String, Vec<Record>>,
}

#[derive(Debug, Deserialize)]
struct TokenReply {
    token: String,
}

/// Spawns webhook tasks sharing one renderer, client, and record store.
#[derive(Clone)]
pub struct WebhookScheduler {
    renderer: Arc<dyn TemplateRenderer>,
    client: reqwest::Client,
    store: Arc<RecordStore>,
}

impl WebhookScheduler {
    /// Create a scheduler.
    pub fn new(
        renderer: Arc<dyn TemplateRenderer>,
        client: reqwest::Client,
        store: Arc<RecordStore>,
    ) -> Self {
        Self {
            renderer,
            client,
            store,
        }
    }

    /// Spawn one task per scheduled webhook.
    ///
    /// Webhooks without a name or timer are ignored; a webhook whose timer
    /// does not parse is logged and skipped.
    pub fn spawn_all(&self, webhooks: &[Webhook], shutdown: &ShutdownSignal) -> Vec<JoinHandle<()>> {
        info!(count = webhooks.len(), "Starting webhook tasks");
        webhooks
            .iter()
            .filter(|webhook| webhook.is_scheduled())
            .filter_map(|webhook| match webhook.period() {
                Ok(period) => Some(self.spawn(webhook.clone(), period, shutdown.listener())),
                Err(e) => {
                    error!(name = %webhook.name, error = %e, "Error parsing webhook timer");
                    None
                }
            })
            .collect()
    }

    /// Spawn the task for a single webhook.
    pub fn spawn(
        &self,
        webhook: Webhook,
        period: Duration,
        shutdown: ShutdownListener,
    ) -> JoinHandle<()> {
        let task = WebhookTask {
            webhook,
            period,
            scheduler: self.clone(),
        };
        tokio::spawn(task.run(shutdown))
    }
}

struct WebhookTask {
    webhook: Webhook,
    period: Duration,
    scheduler: WebhookScheduler,
}

impl WebhookTask {
    async fn run(self, mut shutdown: ShutdownListener) {
        let name = self.webhook.name.as_str();
        info!(name = %name, period = ?self.period, "Start webhook server");

        loop {
            tokio::select! {
                biased;
                () = shutdown.wait() => break,
                () = tokio::time::sleep(self.period) => {}
            }

            tokio::select! {
                biased;
                () = shutdown.wait() => break,
                result = self.invoke() => match result {
                    Ok(status) if status.is_success() => {
                        info!(name = %name, code = status.as_u16(), "Received from webhook");
                    }
                    Ok(status) => {
                        warn!(name = %name, code = status.as_u16(), "Webhook returned non-success status");
                    }
                    Err(e) => error!(name = %name, error = %e, "Error when sending webhook"),
                },
            }
        }

        info!(name = %name, "Stop webhook server");
    }

    async fn invoke(&self) -> Result<StatusCode> {
        let request = &self.webhook.request;
        let renderer = &self.scheduler.renderer;

        let webhook_context = serde_json::to_value(&self.webhook)?;
        let payload =
            renderer.render_bytes("mock webhook server payload", &request.body, &webhook_context)?;

        let method = webhook_method(request)?;
        let state = serde_json::to_value(EngineState {
            collections: self.scheduler.store.snapshot().await,
        })?;
        let api = renderer.render("webhook request api", &request.path, &state)?;

        let mut headers = HeaderMap::new();
        if !request.bearer_api.is_empty() {
            let token = self.bearer_token(&state).await?;
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| MockError::InvalidConfig(format!("invalid bearer token: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }
        // Explicit headers win over the bearer token.
        for (name, value) in &request.header {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| MockError::InvalidConfig(format!("invalid header {name:?}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| MockError::InvalidConfig(format!("invalid header value: {e}")))?;
            headers.insert(name, value);
        }

        let response = self
            .scheduler
            .client
            .request(method, &api)
            .headers(headers)
            .body(payload)
            .send()
            .await?;
        Ok(response.status())
    }

    /// Exchange the request descriptor for a bearer token.
    async fn bearer_token(&self, state: &Value) -> Result<String> {
        let request = &self.webhook.request;
        let api = self
            .scheduler
            .renderer
            .render("webhook bearer api", &request.bearer_api, state)?;

        let reply: TokenReply = self
            .scheduler
            .client
            .post(&api)
            .json(request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(reply.token)
    }
}

fn webhook_method(request: &WebhookRequest) -> Result<Method> {
    let method = request.method.trim();
    if method.is_empty() {
        return Ok(Method::POST);
    }
    Method::from_bytes(method.to_uppercase().as_bytes())
        .map_err(|_| MockError::InvalidConfig(format!("invalid webhook method {method:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::TemplateEngine;

    fn scheduler() -> WebhookScheduler {
        WebhookScheduler::new(
            Arc::new(TemplateEngine::new()),
            reqwest::Client::new(),
            Arc::new(RecordStore::new()),
        )
    }

    fn webhook(name: &str, timer: &str) -> Webhook {
        Webhook {
            name: name.to_string(),
            timer: timer.to_string(),
            request: WebhookRequest {
                path: "http://127.0.0.1:1/hook".to_string(),
                ..WebhookRequest::default()
            },
        }
    }

    #[test]
    fn test_webhook_method_defaults_to_post() {
        assert_eq!(webhook_method(&WebhookRequest::default()).unwrap(), Method::POST);

        let request = WebhookRequest {
            method: "put".to_string(),
            ..WebhookRequest::default()
        };
        assert_eq!(webhook_method(&request).unwrap(), Method::PUT);
    }

    #[tokio::test]
    async fn test_only_scheduled_webhooks_spawn() {
        let signal = ShutdownSignal::new();
        let handles = scheduler().spawn_all(
            &[
                webhook("a", "1h"),
                webhook("", "1h"),
                webhook("c", ""),
                webhook("d", "bogus"),
            ],
            &signal,
        );
        assert_eq!(handles.len(), 1);

        signal.trigger();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(1), handle)
                .await
                .unwrap()
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_failing_invocations_keep_task_alive() {
        let signal = ShutdownSignal::new();
        let handle = scheduler().spawn(
            webhook("fails", "10ms"),
            Duration::from_millis(10),
            signal.listener(),
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!handle.is_finished());

        signal.trigger();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
