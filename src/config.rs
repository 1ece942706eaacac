//! Configuration model for the mock server.
//!
//! Defines record collections, simulated endpoints, proxy rules, and
//! webhook schedules. The model is immutable once loaded.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use axum::http::Method;
use serde::{Deserialize, Serialize};

use crate::error::{MockError, Result};
use crate::matcher::PathPattern;

/// Root configuration consumed by the engine.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Configuration {
    /// Named record collections with CRUD simulation
    #[serde(default, alias = "objects")]
    pub collections: Vec<Collection>,

    /// Single simulated endpoints
    #[serde(default, alias = "items")]
    pub endpoints: Vec<Endpoint>,

    /// Reverse-proxy rules
    #[serde(default)]
    pub proxies: Vec<Proxy>,

    /// Scheduled outbound calls
    #[serde(default)]
    pub webhooks: Vec<Webhook>,
}

impl Configuration {
    /// Parse and validate a YAML document.
    pub fn from_yaml(data: &[u8]) -> Result<Self> {
        let config: Self = serde_yaml::from_slice(data)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for (i, collection) in self.collections.iter().enumerate() {
            collection
                .validate()
                .map_err(|e| invalid(format!("collection {i}: {e}")))?;
            if !names.insert(collection.name.as_str()) {
                return Err(invalid(format!(
                    "collection {i}: duplicate name {:?}",
                    collection.name
                )));
            }
        }
        for (i, endpoint) in self.endpoints.iter().enumerate() {
            endpoint
                .validate()
                .map_err(|e| invalid(format!("endpoint {i}: {e}")))?;
        }
        for (i, proxy) in self.proxies.iter().enumerate() {
            proxy
                .validate()
                .map_err(|e| invalid(format!("proxy {i}: {e}")))?;
        }
        for (i, webhook) in self.webhooks.iter().enumerate() {
            webhook
                .validate()
                .map_err(|e| invalid(format!("webhook {i}: {e}")))?;
        }
        Ok(())
    }
}

fn invalid(message: String) -> MockError {
    MockError::InvalidConfig(message)
}

/// A named, schema-less record collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct Collection {
    /// Collection name, also its route segment
    pub name: String,

    /// Number of records seeded from the sample
    #[serde(default = "default_init_count")]
    pub init_count: usize,

    /// Template producing one seed record as a JSON object
    #[serde(default)]
    pub sample: String,

    /// Declared fields, used for the generated schema only
    #[serde(default)]
    pub fields: Vec<Field>,
}

fn default_init_count() -> usize {
    1
}

impl Collection {
    fn validate(&self) -> std::result::Result<(), String> {
        if self.name.is_empty() {
            return Err("name cannot be empty".to_string());
        }
        if let Some(ch) = self.name.chars().find(|c| matches!(c, '/' | '{' | '}')) {
            return Err(format!("name {:?} cannot contain '{ch}'", self.name));
        }
        Ok(())
    }
}

/// A declared collection field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Field {
    /// Field name
    pub name: String,
    /// Field kind (string, int, number, bool, array, object)
    #[serde(default)]
    pub kind: String,
}

/// A single simulated endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Endpoint {
    /// Endpoint name, for logs and the schema
    #[serde(default)]
    pub name: String,

    /// Request matcher
    pub request: RequestMatcher,

    /// Response template
    #[serde(default)]
    pub response: ResponseTemplate,
}

impl Endpoint {
    fn validate(&self) -> std::result::Result<(), String> {
        self.request.validate()?;
        self.response.validate()
    }
}

/// Request matching for an endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct RequestMatcher {
    /// Path pattern, e.g. `/repos/{name}`
    pub path: String,

    /// Comma separated HTTP methods (empty = GET)
    #[serde(default)]
    pub method: String,

    /// Headers that must be present with exactly these values
    #[serde(default)]
    pub header: BTreeMap<String, String>,

    /// Documented request body
    #[serde(default)]
    pub body: String,
}

impl RequestMatcher {
    /// Methods accepted by this matcher.
    pub fn methods(&self) -> std::result::Result<Vec<Method>, String> {
        parse_methods(&self.method)
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if !self.path.starts_with('/') {
            return Err(format!("path {:?} must start with '/'", self.path));
        }
        PathPattern::parse(&self.path).map_err(|e| format!("invalid path pattern: {e}"))?;
        self.methods()?;
        Ok(())
    }
}

/// Parse a comma separated method list, defaulting to GET.
pub fn parse_methods(text: &str) -> std::result::Result<Vec<Method>, String> {
    let methods: Vec<&str> = text
        .split(',')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .collect();
    if methods.is_empty() {
        return Ok(vec![Method::GET]);
    }
    methods
        .into_iter()
        .map(|m| {
            Method::from_bytes(m.to_uppercase().as_bytes())
                .map_err(|_| format!("invalid method {m:?}"))
        })
        .collect()
}

/// How an endpoint body is turned into bytes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Encoder {
    /// Render the body as a template
    #[default]
    Raw,
    /// Decode the body as standard base64
    Base64,
    /// Fetch the body text as a URL
    #[serde(alias = "fetch-url")]
    Url,
}

/// Response template for an endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ResponseTemplate {
    /// Body encoder
    #[serde(default)]
    pub encoder: Encoder,

    /// Body text, interpreted according to the encoder
    #[serde(default)]
    pub body: String,

    /// Response headers, values are templates
    #[serde(default)]
    pub header: BTreeMap<String, String>,

    /// Status code (0 = 200)
    #[serde(default)]
    pub status_code: u16,
}

impl ResponseTemplate {
    fn validate(&self) -> std::result::Result<(), String> {
        if self.status_code != 0 && !(100..=599).contains(&self.status_code) {
            return Err(format!("invalid status code: {}", self.status_code));
        }
        Ok(())
    }
}

/// A scheduled outbound call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Webhook {
    /// Webhook name
    #[serde(default)]
    pub name: String,

    /// Period between firings, e.g. `500ms` or `1m30s`
    #[serde(default)]
    pub timer: String,

    /// Outbound request
    pub request: WebhookRequest,
}

impl Webhook {
    /// Whether this webhook gets a background task.
    pub fn is_scheduled(&self) -> bool {
        !self.name.is_empty() && !self.timer.is_empty()
    }

    /// The parsed firing period.
    pub fn period(&self) -> std::result::Result<Duration, String> {
        let period = parse_duration(&self.timer)?;
        if period.is_zero() {
            return Err(format!("timer {:?} must be positive", self.timer));
        }
        Ok(period)
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if !self.is_scheduled() {
            return Ok(());
        }
        self.period()?;
        if self.request.path.is_empty() {
            return Err("request path cannot be empty".to_string());
        }
        parse_methods(&self.request.method)?;
        Ok(())
    }
}

/// Outbound request of a webhook.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct WebhookRequest {
    /// Target URL template
    #[serde(default)]
    pub path: String,

    /// HTTP method (empty = POST)
    #[serde(default)]
    pub method: String,

    /// Explicit headers, applied after any bearer token
    #[serde(default)]
    pub header: BTreeMap<String, String>,

    /// Body template
    #[serde(default)]
    pub body: String,

    /// Token exchange URL template
    #[serde(default, rename = "bearerAPI")]
    pub bearer_api: String,

    /// Credentials sent to the token exchange
    #[serde(default)]
    pub username: String,

    /// Credentials sent to the token exchange
    #[serde(default)]
    pub password: String,
}

/// A reverse-proxy rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Proxy {
    /// Path pattern handled by this rule, e.g. `/api/{path:.*}`
    pub path: String,

    /// Target base URL template
    pub target: String,

    /// Path prefix removed before forwarding
    #[serde(default)]
    pub prefix: String,

    /// Dedicated port in compose mode
    #[serde(default)]
    pub port: Option<u16>,
}

impl Proxy {
    fn validate(&self) -> std::result::Result<(), String> {
        if !self.path.starts_with('/') {
            return Err(format!("path {:?} must start with '/'", self.path));
        }
        if self.target.is_empty() {
            return Err("target cannot be empty".to_string());
        }
        PathPattern::parse(&self.path).map_err(|e| format!("invalid path pattern: {e}"))?;
        Ok(())
    }
}

/// Parse a duration such as `300ms`, `1.5s`, or `1h2m3s`.
///
/// A bare `0` is accepted; every other number needs a unit.
pub fn parse_duration(text: &str) -> std::result::Result<Duration, String> {
    let text = text.trim();
    if text == "0" {
        return Ok(Duration::ZERO);
    }
    if text.is_empty() {
        return Err("empty duration".to_string());
    }

    let invalid = || format!("invalid duration {text:?}");
    let mut nanos = 0f64;
    let mut rest = text;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return Err(invalid());
        }
        let (number, tail) = rest.split_at(number_len);
        let value: f64 = number.parse().map_err(|_| invalid())?;

        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);
        let scale = match unit {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            "" => return Err(format!("missing unit in duration {text:?}")),
            other => return Err(format!("unknown unit {other:?} in duration {text:?}")),
        };
        nanos += value * scale;
        rest = tail;
    }

    if !nanos.is_finite() || nanos > u64::MAX as f64 {
        return Err(invalid());
    }
    Ok(Duration::from_nanos(nanos as u64))
}
