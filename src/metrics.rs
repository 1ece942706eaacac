//! Request metrics.
//!
//! Counts handled requests per path. [`NoopMetrics`] is the default;
//! [`InMemoryMetrics`] keeps counters behind a lock and exposes them on
//! the `/metrics` route.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

/// Snapshot of collected metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricData {
    /// Time of the first recorded request
    pub first_request_time: Option<DateTime<Utc>>,
    /// Time of the most recent recorded request
    pub last_request_time: Option<DateTime<Utc>>,
    /// Request count per path
    pub requests: BTreeMap<String, u64>,
}

/// Collects request metrics.
pub trait RequestMetrics: Send + Sync {
    /// Record one request for `path`.
    fn record_request(&self, path: &str);

    /// Copy of the current metrics.
    fn snapshot(&self) -> MetricData;

    /// Whether the `/metrics` route should be registered.
    fn exposes_endpoint(&self) -> bool {
        false
    }
}

/// Metrics collector that records nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl RequestMetrics for NoopMetrics {
    fn record_request(&self, _path: &str) {}

    fn snapshot(&self) -> MetricData {
        MetricData::default()
    }
}

/// Lock-guarded in-memory counters.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    data: RwLock<MetricData>,
}

impl InMemoryMetrics {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self::default()
    }
}

impl RequestMetrics for InMemoryMetrics {
    fn record_request(&self, path: &str) {
        let now = Utc::now();
        let mut data = self.data.write();
        *data.requests.entry(path.to_string()).or_insert(0) += 1;
        data.first_request_time.get_or_insert(now);
        data.last_request_time = Some(now);
    }

    fn snapshot(&self) -> MetricData {
        self.data.read().clone()
    }

    fn exposes_endpoint(&self) -> bool {
        true
    }
}
