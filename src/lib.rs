//! Dynamic Mock Server
//!
//! A declarative HTTP mock server. A YAML document describes an API and
//! the engine serves it: in-memory record collections with CRUD routes,
//! templated endpoints, reverse-proxy rules, and scheduled webhooks.
//!
//! # Features
//!
//! - **Collections**: list/create/get/update/delete over seeded JSON records
//! - **Endpoints**: Handlebars-rendered responses matched by method and headers
//! - **Encoders**: raw templates, base64 bodies, or bodies fetched from a URL
//! - **Proxies**: forward matching requests to a templated target
//! - **Webhooks**: periodic outbound calls with optional bearer token exchange
//! - **Schema**: OpenAPI document of every route at `/api.json`
//! - **Metrics**: per-path request counts at `/metrics`
//!
//! # Example Configuration
//!
//! ```yaml
//! collections:
//!   - name: team
//!     initCount: 2
//!     sample: '{"name": "{{randomString 8}}", "members": []}'
//! endpoints:
//!   - name: repo
//!     request:
//!       path: /repos/{name}
//!     response:
//!       header:
//!         Content-Type: application/json
//!       body: '{"repo": "{{param.name}}"}'
//! webhooks:
//!   - name: heartbeat
//!     timer: 30s
//!     request:
//!       path: http://localhost:9090/heartbeat
//!       body: '{"from": "{{name}}"}'
//! ```

pub mod compose;
pub mod config;
pub mod dispatch;
pub mod endpoint;
pub mod error;
pub mod matcher;
pub mod metrics;
pub mod proxy;
pub mod reader;
pub mod router;
pub mod schema;
pub mod server;
pub mod shutdown;
pub mod store;
pub mod template;
pub mod webhook;

pub use compose::ComposeServer;
pub use config::Configuration;
pub use error::{MockError, RequestError, Result};
pub use metrics::{InMemoryMetrics, MetricData, NoopMetrics, RequestMetrics};
pub use reader::{InMemoryReader, LocalFileReader, ObjectReader, Reader};
pub use server::{MockServer, ServerOptions, DEFAULT_PREFIX};
pub use template::{TemplateEngine, TemplateRenderer};
