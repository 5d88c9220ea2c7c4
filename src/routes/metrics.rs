//! Metrics collection and the `/metrics` exposition endpoint.

use actix_web::{web, HttpResponse, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Thread-safe request counters for gateway observability.
///
/// All counters are atomics updated lock-free by the access-log middleware;
/// the collector is cloned freely and clones share the same counters.
///
/// Rendered in Prometheus text exposition at `GET /metrics`.
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    /// Total requests handled.
    pub requests_total: Arc<AtomicU64>,
    /// Requests answered 2xx/3xx.
    pub requests_success: Arc<AtomicU64>,
    /// Requests answered 4xx.
    pub requests_client_error: Arc<AtomicU64>,
    /// Requests answered 5xx.
    pub requests_server_error: Arc<AtomicU64>,
    /// Sum of response times in milliseconds, for average latency.
    pub response_time_ms_sum: Arc<AtomicU64>,
    /// Total response body bytes written (sized bodies only).
    pub response_bytes_total: Arc<AtomicU64>,
    /// Requests currently in flight.
    pub active_requests: Arc<AtomicU64>,
    /// Highest concurrency observed.
    pub peak_requests: Arc<AtomicU64>,
    start_time: Instant,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self {
            requests_total: Arc::new(AtomicU64::new(0)),
            requests_success: Arc::new(AtomicU64::new(0)),
            requests_client_error: Arc::new(AtomicU64::new(0)),
            requests_server_error: Arc::new(AtomicU64::new(0)),
            response_time_ms_sum: Arc::new(AtomicU64::new(0)),
            response_bytes_total: Arc::new(AtomicU64::new(0)),
            active_requests: Arc::new(AtomicU64::new(0)),
            peak_requests: Arc::new(AtomicU64::new(0)),
            start_time: Instant::now(),
        }
    }
}

impl MetricsCollector {
    pub fn request_started(&self) {
        let active = self.active_requests.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_requests.fetch_max(active, Ordering::Relaxed);
    }

    pub fn request_finished(&self, status: u16, duration: Duration, response_bytes: u64) {
        self.active_requests.fetch_sub(1, Ordering::Relaxed);
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        match status {
            200..=399 => self.requests_success.fetch_add(1, Ordering::Relaxed),
            400..=499 => self.requests_client_error.fetch_add(1, Ordering::Relaxed),
            _ => self.requests_server_error.fetch_add(1, Ordering::Relaxed),
        };
        self.response_time_ms_sum
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
        self.response_bytes_total
            .fetch_add(response_bytes, Ordering::Relaxed);
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Renders the counters in Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(1024);
        let counters: &[(&str, &str, u64)] = &[
            (
                "gateway_requests_total",
                "Total requests handled",
                self.requests_total.load(Ordering::Relaxed),
            ),
            (
                "gateway_requests_success_total",
                "Requests answered 2xx/3xx",
                self.requests_success.load(Ordering::Relaxed),
            ),
            (
                "gateway_requests_client_error_total",
                "Requests answered 4xx",
                self.requests_client_error.load(Ordering::Relaxed),
            ),
            (
                "gateway_requests_server_error_total",
                "Requests answered 5xx",
                self.requests_server_error.load(Ordering::Relaxed),
            ),
            (
                "gateway_response_time_ms_sum",
                "Sum of response times in milliseconds",
                self.response_time_ms_sum.load(Ordering::Relaxed),
            ),
            (
                "gateway_response_bytes_total",
                "Total response body bytes written",
                self.response_bytes_total.load(Ordering::Relaxed),
            ),
        ];
        for (name, help, value) in counters {
            out.push_str(&format!(
                "# HELP {name} {help}\n# TYPE {name} counter\n{name} {value}\n"
            ));
        }

        let gauges: &[(&str, &str, u64)] = &[
            (
                "gateway_active_requests",
                "Requests currently in flight",
                self.active_requests.load(Ordering::Relaxed),
            ),
            (
                "gateway_peak_requests",
                "Highest concurrency observed",
                self.peak_requests.load(Ordering::Relaxed),
            ),
            (
                "gateway_uptime_seconds",
                "Seconds since process start",
                self.uptime_seconds(),
            ),
        ];
        for (name, help, value) in gauges {
            out.push_str(&format!(
                "# HELP {name} {help}\n# TYPE {name} gauge\n{name} {value}\n"
            ));
        }

        out
    }
}

async fn metrics_endpoint(collector: web::Data<MetricsCollector>) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4; charset=utf-8")
        .body(collector.render()))
}

/// Registers `GET /metrics`.
pub fn configure_metrics(cfg: &mut web::ServiceConfig) {
    cfg.route("/metrics", web::get().to(metrics_endpoint));
}
