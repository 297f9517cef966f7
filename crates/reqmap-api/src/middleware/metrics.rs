//! # Prometheus Metrics
//!
//! HTTP-level metrics (request counts, latency, errors) are recorded in
//! middleware. Domain counters (resolutions served, manual decisions, bulk
//! rows committed, reconciliation writes) are incremented by the route
//! handlers after a successful engine call.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use prometheus::{
    core::Collector, Encoder, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};

/// Shared metrics state backed by a Prometheus registry.
#[derive(Clone)]
pub struct ApiMetrics {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Registry,

    http_requests_total: IntCounterVec,
    http_request_duration_seconds: HistogramVec,
    http_errors_total: IntCounterVec,

    resolutions_served_total: IntCounter,
    manual_actions_total: IntCounterVec,
    bulk_mappings_committed_total: IntCounter,
    reconcile_rows_total: IntCounterVec,
}

impl std::fmt::Debug for ApiMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiMetrics")
            .field("requests", &self.requests())
            .field("errors", &self.errors())
            .finish()
    }
}

impl ApiMetrics {
    /// Create a new metrics instance with a fresh Prometheus registry.
    pub fn new() -> Self {
        let registry = Registry::new();

        let http_requests_total = IntCounterVec::new(
            Opts::new("reqmap_http_requests_total", "Total HTTP requests"),
            &["method", "path", "status"],
        )
        .expect("metric can be created");

        let http_request_duration_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "reqmap_http_request_duration_seconds",
                "HTTP request duration in seconds",
            )
            .buckets(vec![
                0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ]),
            &["method", "path"],
        )
        .expect("metric can be created");

        let http_errors_total = IntCounterVec::new(
            Opts::new("reqmap_http_errors_total", "Total HTTP errors (4xx and 5xx)"),
            &["method", "path", "status"],
        )
        .expect("metric can be created");

        let resolutions_served_total = IntCounter::new(
            "reqmap_resolutions_served_total",
            "Organization requirement resolutions served",
        )
        .expect("metric can be created");

        let manual_actions_total = IntCounterVec::new(
            Opts::new(
                "reqmap_manual_actions_total",
                "Manual mapping decisions by action",
            ),
            &["action"],
        )
        .expect("metric can be created");

        let bulk_mappings_committed_total = IntCounter::new(
            "reqmap_bulk_mappings_committed_total",
            "Mappings committed by bulk filter inclusion",
        )
        .expect("metric can be created");

        let reconcile_rows_total = IntCounterVec::new(
            Opts::new(
                "reqmap_reconcile_rows_total",
                "Automatic cache rows changed by explicit reconciliation",
            ),
            &["change"],
        )
        .expect("metric can be created");

        registry
            .register(Box::new(http_requests_total.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(http_request_duration_seconds.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(http_errors_total.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(resolutions_served_total.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(manual_actions_total.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(bulk_mappings_committed_total.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(reconcile_rows_total.clone()))
            .expect("metric can be registered");

        Self {
            inner: Arc::new(Inner {
                registry,
                http_requests_total,
                http_request_duration_seconds,
                http_errors_total,
                resolutions_served_total,
                manual_actions_total,
                bulk_mappings_committed_total,
                reconcile_rows_total,
            }),
        }
    }

    /// Return current total request count (sum across all labels).
    pub fn requests(&self) -> u64 {
        sum_counters(&self.inner.http_requests_total)
    }

    /// Return current total error count (sum across all labels).
    pub fn errors(&self) -> u64 {
        sum_counters(&self.inner.http_errors_total)
    }

    /// Record an HTTP request (called by the middleware).
    fn record_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let status_str = status.to_string();
        self.inner
            .http_requests_total
            .with_label_values(&[method, path, &status_str])
            .inc();

        self.inner
            .http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration_secs);

        if status >= 400 {
            self.inner
                .http_errors_total
                .with_label_values(&[method, path, &status_str])
                .inc();
        }
    }

    /// Count one served resolution.
    pub fn resolution_served(&self) {
        self.inner.resolutions_served_total.inc();
    }

    /// Count one manual decision (`include`, `exclude`, `revert`).
    pub fn manual_action(&self, action: &str) {
        self.inner
            .manual_actions_total
            .with_label_values(&[action])
            .inc();
    }

    /// Count rows committed by a bulk inclusion.
    pub fn bulk_committed(&self, rows: usize) {
        self.inner.bulk_mappings_committed_total.inc_by(rows as u64);
    }

    /// Count cache rows written and removed by an explicit reconcile.
    pub fn reconciled(&self, written: usize, removed: usize) {
        self.inner
            .reconcile_rows_total
            .with_label_values(&["written"])
            .inc_by(written as u64);
        self.inner
            .reconcile_rows_total
            .with_label_values(&["removed"])
            .inc_by(removed as u64);
    }

    /// Total resolutions served so far.
    pub fn resolutions_served(&self) -> u64 {
        self.inner.resolutions_served_total.get()
    }

    /// Total manual decisions recorded for one action label.
    pub fn manual_actions(&self, action: &str) -> u64 {
        self.inner
            .manual_actions_total
            .with_label_values(&[action])
            .get()
    }

    /// Gather all metrics and encode to Prometheus text format.
    pub fn gather_and_encode(&self) -> Result<String, String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| format!("failed to encode metrics: {e}"))?;
        String::from_utf8(buffer)
            .map_err(|e| format!("metrics encoding produced invalid UTF-8: {e}"))
    }
}

impl Default for ApiMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn sum_counters(vec: &IntCounterVec) -> u64 {
    let mut total = 0u64;
    for mf in &vec.collect() {
        for m in mf.get_metric() {
            total += m.get_counter().get_value() as u64;
        }
    }
    total
}

/// Normalize a request path by replacing UUID segments with `{id}`.
///
/// Keeps Prometheus label cardinality bounded.
fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if segment.len() == 36
                && segment.chars().enumerate().all(|(i, c)| {
                    if i == 8 || i == 13 || i == 18 || i == 23 {
                        c == '-'
                    } else {
                        c.is_ascii_hexdigit()
                    }
                })
            {
                "{id}"
            } else if segment.len() == 32 && segment.chars().all(|c| c.is_ascii_hexdigit()) {
                "{id}"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Middleware that records HTTP request metrics via Prometheus.
pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let metrics = request.extensions().get::<ApiMetrics>().cloned();
    let method = request.method().to_string();
    let path = normalize_path(request.uri().path());
    let start = Instant::now();

    let response = next.run(request).await;

    if let Some(m) = metrics {
        let duration = start.elapsed().as_secs_f64();
        m.record_request(&method, &path, response.status().as_u16(), duration);
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_metrics_new_starts_at_zero() {
        let m = ApiMetrics::new();
        assert_eq!(m.requests(), 0);
        assert_eq!(m.errors(), 0);
        assert_eq!(m.resolutions_served(), 0);
    }

    #[test]
    fn requests_and_errors_are_counted_independently() {
        let m = ApiMetrics::new();
        for _ in 0..5 {
            m.record_request("GET", "/ok", 200, 0.01);
        }
        m.record_request("GET", "/fail", 503, 0.1);
        m.record_request("POST", "/fail", 422, 0.05);
        assert_eq!(m.requests(), 7);
        assert_eq!(m.errors(), 2);
    }

    #[test]
    fn clone_shares_underlying_counters() {
        let m = ApiMetrics::new();
        let clone = m.clone();
        m.record_request("GET", "/test", 200, 0.01);
        assert_eq!(clone.requests(), 1);
        clone.manual_action("exclude");
        assert_eq!(m.manual_actions("exclude"), 1);
    }

    #[test]
    fn concurrent_increments_are_safe() {
        let m = ApiMetrics::new();
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let m = m.clone();
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        m.record_request("GET", "/test", 200, 0.001);
                        m.resolution_served();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(m.requests(), 4_000);
        assert_eq!(m.resolutions_served(), 4_000);
    }

    #[test]
    fn gather_and_encode_includes_domain_counters() {
        let m = ApiMetrics::new();
        m.record_request("GET", "/test", 200, 0.01);
        m.resolution_served();
        m.manual_action("include");
        m.bulk_committed(12);
        m.reconciled(3, 1);

        let output = m.gather_and_encode().unwrap();
        assert!(output.contains("reqmap_http_requests_total"));
        assert!(output.contains("reqmap_http_request_duration_seconds"));
        assert!(output.contains("reqmap_resolutions_served_total 1"));
        assert!(output.contains("reqmap_manual_actions_total{action=\"include\"} 1"));
        assert!(output.contains("reqmap_bulk_mappings_committed_total 12"));
        assert!(output.contains("reqmap_reconcile_rows_total{change=\"written\"} 3"));
    }

    #[test]
    fn normalize_path_replaces_uuids() {
        let path = "/v1/organizations/550e8400-e29b-41d4-a716-446655440000/requirements/660e8400e29b41d4a716446655440001";
        assert_eq!(
            normalize_path(path),
            "/v1/organizations/{id}/requirements/{id}"
        );
    }

    #[test]
    fn normalize_path_preserves_non_uuid_segments() {
        assert_eq!(normalize_path("/v1/audit/verify"), "/v1/audit/verify");
    }
}
