//! Compose mode: one mock server per proxy rule.
//!
//! Each proxy runs on its own port with its own prefix as the mock
//! prefix, so several upstreams can be fronted from one configuration.

use tracing::{info, warn};

use crate::config::Configuration;
use crate::error::Result;
use crate::reader::ObjectReader;
use crate::server::{MockServer, ServerOptions};

/// A group of proxy servers started from one configuration.
#[derive(Default)]
pub struct ComposeServer {
    servers: Vec<MockServer>,
}

impl ComposeServer {
    /// Start one server per proxy in `config`.
    ///
    /// A proxy without a port gets an ephemeral one. If any server fails
    /// to start, the ones already running are stopped.
    pub async fn start(config: &Configuration, options: &ServerOptions) -> Result<Self> {
        let mut compose = Self::default();
        for proxy in &config.proxies {
            let reader = ObjectReader::new(Configuration {
                proxies: vec![proxy.clone()],
                ..Configuration::default()
            });
            let mut server =
                MockServer::with_options(options.clone().with_port(proxy.port.unwrap_or(0)));

            if let Err(e) = server.start(&reader, &proxy.prefix).await {
                if let Err(stop_err) = compose.stop().await {
                    warn!(error = %stop_err, "Failed to stop compose server");
                }
                return Err(e);
            }
            info!(
                target = %proxy.target,
                port = %server.port(),
                prefix = %proxy.prefix,
                "Started compose proxy"
            );
            compose.servers.push(server);
        }
        Ok(compose)
    }

    /// The running servers, in proxy order.
    pub fn servers(&self) -> &[MockServer] {
        &self.servers
    }

    /// Stop every server, returning the first failure.
    pub async fn stop(&mut self) -> Result<()> {
        let mut first_error = None;
        for mut server in self.servers.drain(..) {
            if let Err(e) = server.stop().await {
                warn!(port = %server.port(), error = %e, "Failed to stop compose server");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
