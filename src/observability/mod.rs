//! Fetch metrics and log redaction.

use reqwest::header::HeaderMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Counters shared by every fetch of one client.
#[derive(Debug, Default)]
pub struct Metrics {
    requests: AtomicU64,
    responses: AtomicU64,
    transport_failures: AtomicU64,
    retries: AtomicU64,
    throttled: AtomicU64,
    pages: AtomicU64,
    records: AtomicU64,
    latency_total_us: AtomicU64,
    latency_count: AtomicU64,
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

impl Metrics {
    /// Creates a new metrics collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a request handed to the transport.
    pub fn record_request(&self) {
        bump(&self.requests, 1);
    }

    /// Records an HTTP response of any status.
    pub fn record_response(&self) {
        bump(&self.responses, 1);
    }

    /// Records a request that timed out or never got a response.
    pub fn record_transport_failure(&self) {
        bump(&self.transport_failures, 1);
    }

    /// Records a repeated attempt of a timed out or failed request.
    pub fn record_retry(&self) {
        bump(&self.retries, 1);
    }

    /// Records a 429 response.
    pub fn record_throttled(&self) {
        bump(&self.throttled, 1);
    }

    /// Records an accepted page and the records it carried.
    pub fn record_page(&self, records: usize) {
        bump(&self.pages, 1);
        bump(&self.records, records as u64);
    }

    /// Records request latency.
    pub fn record_latency(&self, duration: Duration) {
        bump(&self.latency_total_us, duration.as_micros() as u64);
        bump(&self.latency_count, 1);
    }

    /// Gets the average latency in microseconds.
    pub fn average_latency_us(&self) -> u64 {
        let count = self.latency_count.load(Ordering::Relaxed);
        self.latency_total_us
            .load(Ordering::Relaxed)
            .checked_div(count)
            .unwrap_or(0)
    }

    /// Gets a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            requests: load(&self.requests),
            responses: load(&self.responses),
            transport_failures: load(&self.transport_failures),
            retries: load(&self.retries),
            throttled: load(&self.throttled),
            pages: load(&self.pages),
            records: load(&self.records),
            average_latency_us: self.average_latency_us(),
        }
    }

    /// Resets all metrics.
    pub fn reset(&self) {
        for counter in [
            &self.requests,
            &self.responses,
            &self.transport_failures,
            &self.retries,
            &self.throttled,
            &self.pages,
            &self.records,
            &self.latency_total_us,
            &self.latency_count,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Requests handed to the transport, retries included.
    pub requests: u64,
    /// HTTP responses of any status.
    pub responses: u64,
    /// Requests that timed out or failed to connect.
    pub transport_failures: u64,
    /// Repeated attempts after a timeout or connection failure.
    pub retries: u64,
    /// 429 responses.
    pub throttled: u64,
    /// Pages accepted by the paginated fetcher.
    pub pages: u64,
    /// Raw records on accepted pages.
    pub records: u64,
    /// Average latency in microseconds.
    pub average_latency_us: u64,
}

/// Times one request from hand-off to outcome.
pub struct RequestTimer {
    start: Instant,
    metrics: Arc<Metrics>,
}

impl RequestTimer {
    /// Starts timing a request.
    pub fn new(metrics: Arc<Metrics>) -> Self {
        metrics.record_request();
        Self {
            start: Instant::now(),
            metrics,
        }
    }

    /// The request got a response.
    pub fn response(self) {
        self.metrics.record_response();
        self.metrics.record_latency(self.start.elapsed());
    }

    /// The request timed out or failed at the transport.
    pub fn failure(self) {
        self.metrics.record_transport_failure();
        self.metrics.record_latency(self.start.elapsed());
    }
}

/// Headers whose values never reach the logs.
pub const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "private-token",
    "job-token",
    "x-gitlab-token",
    "cookie",
    "set-cookie",
];

/// Redacts the value of a sensitive header.
pub fn redact_header(name: &str, value: &str) -> String {
    if SENSITIVE_HEADERS.contains(&name.to_lowercase().as_str()) {
        "[REDACTED]".to_string()
    } else {
        value.to_string()
    }
}

/// Renders headers for logging with sensitive values redacted.
pub fn redact_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let value = value.to_str().unwrap_or("<binary>");
            (name.to_string(), redact_header(name.as_str(), value))
        })
        .collect()
}
