//! HTTP request metrics.
//!
//! # Responsibilities
//! - Define the [`MetricsProvider`] seam the metrics stage reports through
//! - Implement it on the `metrics` facade with Prometheus naming
//! - Install the Prometheus recorder whose handle backs `GET /metrics`
//!
//! # Metrics
//! - `<namespace>_http_requests_total` (counter): requests by method, route, status
//! - `<namespace>_http_request_duration_seconds` (histogram): latency distribution
//!
//! # Design Decisions
//! - Every series carries the const label `app`
//! - Histogram buckets follow the usual web latency defaults (5ms to 10s)

use std::time::Duration;

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Latency buckets in seconds.
pub const DURATION_BUCKETS: [f64; 11] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Label set of one observed request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HttpRequestLabels {
    pub method: String,
    pub route: String,
    pub status_code: u16,
}

/// Sink for per-request metrics.
pub trait MetricsProvider: Send + Sync {
    /// Count one finished request.
    fn inc_requests(&self, labels: &HttpRequestLabels);

    /// Record how long the request took.
    fn observe_duration(&self, labels: &HttpRequestLabels, duration: Duration);
}

/// [`MetricsProvider`] emitting through the global `metrics` recorder.
#[derive(Debug, Clone)]
pub struct PrometheusMetrics {
    requests_total: String,
    request_duration: String,
    app: String,
}

impl PrometheusMetrics {
    pub fn new(namespace: &str, app: &str) -> Self {
        Self {
            requests_total: format!("{namespace}_http_requests_total"),
            request_duration: format!("{namespace}_http_request_duration_seconds"),
            app: app.to_string(),
        }
    }

    /// Register help text with the active recorder.
    pub fn describe(&self) {
        describe_counter!(
            self.requests_total.clone(),
            Unit::Count,
            "Total number of HTTP requests processed."
        );
        describe_histogram!(
            self.request_duration.clone(),
            Unit::Seconds,
            "HTTP request latency in seconds."
        );
    }

    fn labels(&self, labels: &HttpRequestLabels) -> [(&'static str, String); 4] {
        [
            ("method", labels.method.clone()),
            ("route", labels.route.clone()),
            ("status_code", labels.status_code.to_string()),
            ("app", self.app.clone()),
        ]
    }
}

impl MetricsProvider for PrometheusMetrics {
    fn inc_requests(&self, labels: &HttpRequestLabels) {
        let labels = self.labels(labels);
        counter!(self.requests_total.clone(), &labels).increment(1);
    }

    fn observe_duration(&self, labels: &HttpRequestLabels, duration: Duration) {
        let labels = self.labels(labels);
        histogram!(self.request_duration.clone(), &labels).record(duration.as_secs_f64());
    }
}

/// Install the Prometheus recorder as the global `metrics` recorder.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new()
        .set_buckets(&DURATION_BUCKETS)?
        .install_recorder()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(status_code: u16) -> HttpRequestLabels {
        HttpRequestLabels {
            method: "GET".to_string(),
            route: "/users/{id}".to_string(),
            status_code,
        }
    }

    #[test]
    fn test_series_names_follow_namespace() {
        let provider = PrometheusMetrics::new("keeper", "server");
        assert_eq!(provider.requests_total, "keeper_http_requests_total");
        assert_eq!(provider.request_duration, "keeper_http_request_duration_seconds");
    }

    #[test]
    fn test_prometheus_rendering() {
        let recorder = PrometheusBuilder::new()
            .set_buckets(&DURATION_BUCKETS)
            .unwrap()
            .build_recorder();
        let handle = recorder.handle();
        let provider = PrometheusMetrics::new("keeper", "server");

        metrics::with_local_recorder(&recorder, || {
            provider.describe();
            provider.inc_requests(&labels(200));
            provider.inc_requests(&labels(200));
            provider.inc_requests(&labels(500));
            provider.observe_duration(&labels(200), Duration::from_millis(20));
        });

        let rendered = handle.render();
        assert!(rendered.contains("# TYPE keeper_http_requests_total counter"));
        assert!(rendered.contains("keeper_http_request_duration_seconds_bucket"));

        let ok_line = rendered
            .lines()
            .find(|line| {
                line.starts_with("keeper_http_requests_total{") && line.contains("status_code=\"200\"")
            })
            .expect("counter series for 200");
        assert!(ok_line.contains("method=\"GET\""));
        assert!(ok_line.contains("route=\"/users/{id}\""));
        assert!(ok_line.contains("app=\"server\""));
        assert!(ok_line.ends_with(" 2"));

        assert!(rendered
            .lines()
            .any(|line| line.starts_with("keeper_http_requests_total{")
                && line.contains("status_code=\"500\"")
                && line.ends_with(" 1")));
    }
}
