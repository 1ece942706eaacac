//! Mock server lifecycle.
//!
//! [`MockServer::setup_handler`] loads a configuration and builds the
//! router; [`MockServer::start`] additionally binds a listener and serves
//! it in the background until [`MockServer::stop`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::dispatch::{normalize_prefix, Dispatcher};
use crate::error::{MockError, Result};
use crate::metrics::{InMemoryMetrics, MetricData, NoopMetrics, RequestMetrics};
use crate::reader::Reader;
use crate::router::build_routes;
use crate::shutdown::ShutdownSignal;
use crate::store::RecordStore;
use crate::template::{TemplateEngine, TemplateRenderer};
use crate::webhook::WebhookScheduler;

/// Prefix used when none is given.
pub const DEFAULT_PREFIX: &str = "/mock";

/// Runtime options for a [`MockServer`].
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Address to bind.
    pub host: String,
    /// Port to bind; 0 picks a free port.
    pub port: u16,
    /// Timeout of every outbound call (fetch-url, proxy, webhook).
    pub outbound_timeout: Duration,
    /// How long `stop` waits for in-flight requests.
    pub shutdown_grace: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: String::from("0.0.0.0"),
            port: 0,
            outbound_timeout: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl ServerOptions {
    /// Set the bind address.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the outbound call timeout.
    pub fn with_outbound_timeout(mut self, timeout: Duration) -> Self {
        self.outbound_timeout = timeout;
        self
    }

    /// Set the shutdown grace period.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}

/// A configurable HTTP mock server.
pub struct MockServer {
    options: ServerOptions,
    renderer: Arc<dyn TemplateRenderer>,
    metrics: Arc<dyn RequestMetrics>,
    shutdown: ShutdownSignal,
    webhooks: Vec<JoinHandle<()>>,
    serve_task: Option<JoinHandle<Result<()>>>,
    local_addr: Option<SocketAddr>,
}

impl MockServer {
    /// Create a server for `port` with default options.
    pub fn new(port: u16) -> Self {
        Self::with_options(ServerOptions::default().with_port(port))
    }

    /// Create a server with explicit options.
    pub fn with_options(options: ServerOptions) -> Self {
        Self {
            options,
            renderer: Arc::new(TemplateEngine::new()),
            metrics: Arc::new(NoopMetrics),
            shutdown: ShutdownSignal::new(),
            webhooks: Vec::new(),
            serve_task: None,
            local_addr: None,
        }
    }

    /// Use a different template renderer.
    pub fn with_renderer(mut self, renderer: Arc<dyn TemplateRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    /// Collect request metrics and expose them on `/metrics`.
    ///
    /// Takes effect on the next setup.
    pub fn enable_metrics(&mut self) {
        self.metrics = Arc::new(InMemoryMetrics::new());
    }

    /// Current metrics.
    pub fn metrics(&self) -> MetricData {
        self.metrics.snapshot()
    }

    /// Load the configuration and build the router without binding.
    ///
    /// Scheduled webhooks start immediately; they stop with [`Self::stop`].
    /// Fails with [`MockError::AlreadyRunning`] while webhooks from an
    /// earlier setup are still scheduled, so `setup_handler` and `start`
    /// cannot both be used without a `stop` in between.
    pub async fn setup_handler(&mut self, reader: &dyn Reader, prefix: &str) -> Result<Router> {
        if self.serve_task.is_some() || !self.webhooks.is_empty() {
            return Err(MockError::AlreadyRunning);
        }
        let config = reader.parse().await?;
        if self.shutdown.is_shutdown() {
            self.shutdown = ShutdownSignal::new();
        }

        let client = reqwest::Client::builder()
            .timeout(self.options.outbound_timeout)
            .build()?;
        let store = Arc::new(RecordStore::seeded(
            &config.collections,
            self.renderer.as_ref(),
        )?);
        let routes = build_routes(
            &config,
            self.renderer.clone(),
            client.clone(),
            self.metrics.exposes_endpoint(),
        )?;
        info!(
            collections = config.collections.len(),
            endpoints = config.endpoints.len(),
            proxies = config.proxies.len(),
            routes = routes.routes().len(),
            "Registered mock routes"
        );

        let scheduler = WebhookScheduler::new(self.renderer.clone(), client, store.clone());
        self.webhooks
            .extend(scheduler.spawn_all(&config.webhooks, &self.shutdown));

        let prefix = normalize_prefix(prefix);
        let dispatcher = Dispatcher::new(
            &prefix,
            routes,
            config.collections,
            store,
            self.metrics.clone(),
        );
        Ok(dispatcher.into_router())
    }

    /// Load the configuration, bind the listener, and serve in the
    /// background.
    pub async fn start(&mut self, reader: &dyn Reader, prefix: &str) -> Result<()> {
        if self.serve_task.is_some() {
            return Err(MockError::AlreadyRunning);
        }

        let router = self.setup_handler(reader, prefix).await?;

        let addr = format!("{}:{}", self.options.host, self.options.port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(e) => {
                self.shutdown.trigger();
                self.join_webhooks().await;
                return Err(MockError::Bind(format!("bind failed on {addr}: {e}")));
            }
        };
        let local_addr = listener
            .local_addr()
            .map_err(|e| MockError::Bind(e.to_string()))?;
        self.local_addr = Some(local_addr);
        info!(addr = %local_addr, prefix = %normalize_prefix(prefix), "Mock server listening");

        let mut shutdown = self.shutdown.listener();
        self.serve_task = Some(tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move { shutdown.wait().await })
                .await
                .map_err(|e| MockError::Serve(e.to_string()))
        }));
        Ok(())
    }

    /// The bound port, or the configured one before `start`.
    pub fn port(&self) -> String {
        self.local_addr
            .map(|addr| addr.port())
            .unwrap_or(self.options.port)
            .to_string()
    }

    /// The bound address, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Whether the listener is running.
    pub fn is_running(&self) -> bool {
        self.serve_task.is_some()
    }

    /// Signal shutdown, wait for the listener, and join every webhook task.
    ///
    /// A serve failure is returned after the webhooks have been joined.
    pub async fn stop(&mut self) -> Result<()> {
        self.shutdown.trigger();

        let served = match self.serve_task.take() {
            Some(mut task) => {
                match tokio::time::timeout(self.options.shutdown_grace, &mut task).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(e)) => Err(MockError::Serve(e.to_string())),
                    Err(_) => {
                        warn!(
                            grace = ?self.options.shutdown_grace,
                            "Shutdown grace period elapsed, aborting listener"
                        );
                        task.abort();
                        Ok(())
                    }
                }
            }
            None => Ok(()),
        };

        self.join_webhooks().await;
        self.local_addr = None;
        info!("Mock server stopped");
        served
    }

    async fn join_webhooks(&mut self) {
        for handle in self.webhooks.drain(..) {
            if let Err(e) = handle.await {
                warn!(error = %e, "Webhook task ended abnormally");
            }
        }
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}
