//! Per-process Prometheus instruments.
//!
//! Each worker owns one private [`Registry`]; nothing is registered with the
//! prometheus default registry, so the only way these values leave the
//! process is through the shard file.

use std::time::Duration;

use chrono::Utc;
use prometheus::proto::MetricFamily;
use prometheus::{CounterVec, Gauge, HistogramOpts, HistogramVec, Opts, Registry};

/// HTTP request latency buckets (seconds)
/// Covers: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s, 10s
pub const HTTP_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0,
];

/// Store operation latency buckets (seconds)
pub const STORE_LATENCY_BUCKETS: &[f64] =
    &[0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5];

/// Container for one worker's metrics.
#[derive(Clone)]
pub struct WorkerMetrics {
    registry: Registry,

    /// HTTP request counter - labels: method, path, status
    pub requests_total: CounterVec,

    /// HTTP request duration histogram - labels: method, path
    pub request_duration_seconds: HistogramVec,

    /// Cache lookups - labels: outcome (hit/miss/error/skipped)
    pub cache_lookups_total: CounterVec,

    /// Store calls - labels: operation, status (ok/error)
    pub store_operations_total: CounterVec,

    /// Store call duration - labels: operation
    pub store_operation_duration_seconds: HistogramVec,

    /// Unix time of the last instrumented request
    pub last_request_timestamp_seconds: Gauge,
}

impl WorkerMetrics {
    /// Create and register every instrument on a fresh registry.
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let requests_total = CounterVec::new(
            Opts::new("requests_total", "Total number of HTTP requests"),
            &["method", "path", "status"],
        )?;
        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new("request_duration_seconds", "HTTP request duration in seconds")
                .buckets(HTTP_LATENCY_BUCKETS.to_vec()),
            &["method", "path"],
        )?;
        let cache_lookups_total = CounterVec::new(
            Opts::new("cache_lookups_total", "Cache tier lookups by outcome"),
            &["outcome"],
        )?;
        let store_operations_total = CounterVec::new(
            Opts::new("store_operations_total", "Document store operations"),
            &["operation", "status"],
        )?;
        let store_operation_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "store_operation_duration_seconds",
                "Document store operation duration in seconds",
            )
            .buckets(STORE_LATENCY_BUCKETS.to_vec()),
            &["operation"],
        )?;
        let last_request_timestamp_seconds = Gauge::with_opts(Opts::new(
            "last_request_timestamp_seconds",
            "Unix time of the most recent instrumented request",
        ))?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(request_duration_seconds.clone()))?;
        registry.register(Box::new(cache_lookups_total.clone()))?;
        registry.register(Box::new(store_operations_total.clone()))?;
        registry.register(Box::new(store_operation_duration_seconds.clone()))?;
        registry.register(Box::new(last_request_timestamp_seconds.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            request_duration_seconds,
            cache_lookups_total,
            store_operations_total,
            store_operation_duration_seconds,
            last_request_timestamp_seconds,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Snapshot every registered family.
    pub fn gather(&self) -> Vec<MetricFamily> {
        self.registry.gather()
    }

    /// Record a completed HTTP request.
    pub fn record_request(&self, method: &str, path: &str, status: u16, elapsed: Duration) {
        let status = status.to_string();
        self.requests_total
            .with_label_values(&[method, path, status.as_str()])
            .inc();
        self.request_duration_seconds
            .with_label_values(&[method, path])
            .observe(elapsed.as_secs_f64());
        self.last_request_timestamp_seconds
            .set(Utc::now().timestamp_millis() as f64 / 1000.0);
    }

    /// Record one cache lookup.
    pub fn record_cache_lookup(&self, outcome: &str) {
        self.cache_lookups_total.with_label_values(&[outcome]).inc();
    }

    /// Record one store call.
    pub fn record_store_operation(&self, operation: &str, succeeded: bool, elapsed: Duration) {
        let status = if succeeded { "ok" } else { "error" };
        self.store_operations_total
            .with_label_values(&[operation, status])
            .inc();
        self.store_operation_duration_seconds
            .with_label_values(&[operation])
            .observe(elapsed.as_secs_f64());
    }
}
