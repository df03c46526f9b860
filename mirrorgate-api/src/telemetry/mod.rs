//! Mirrorgate Telemetry - Observability Infrastructure
//!
//! Structured logging and per-process Prometheus instrumentation for the
//! worker. Scrapes are answered from the merged shard directory.

pub mod metrics;
pub mod middleware;
pub mod tracer;

pub use metrics::{metrics_handler, MetricsObserver};
pub use middleware::observability_middleware;
pub use tracer::{init_tracer, TelemetryConfig, ZonedTimer};
