//! Prometheus Scrape Endpoint
//!
//! `/metrics` never reads this process's registry directly. It merges every
//! shard in the metrics directory, so any worker can answer for the whole pool.

use std::time::Duration;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};
use mirrorgate_core::{MirrorError, WorkerExit};
use mirrorgate_metrics::{WorkerMetrics, TEXT_CONTENT_TYPE};
use mirrorgate_storage::{AccessObserver, LookupOutcome};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Feeds accessor events into the worker's instruments.
#[derive(Clone)]
pub struct MetricsObserver {
    metrics: WorkerMetrics,
}

impl MetricsObserver {
    pub fn new(metrics: WorkerMetrics) -> Self {
        Self { metrics }
    }
}

impl AccessObserver for MetricsObserver {
    fn cache_lookup(&self, outcome: LookupOutcome) {
        self.metrics.record_cache_lookup(outcome.as_str());
    }

    fn store_operation(&self, operation: &'static str, succeeded: bool, elapsed: Duration) {
        self.metrics
            .record_store_operation(operation, succeeded, elapsed);
    }
}

/// Handler for the /metrics endpoint.
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/metrics",
    tag = "Metrics",
    responses(
        (status = 200, description = "Merged Prometheus exposition", body = String, content_type = "text/plain"),
        (status = 503, description = "Metrics directory unavailable", body = ApiError),
    ),
))]
pub async fn metrics_handler(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let aggregator = state.aggregator.clone();
    let merged = tokio::task::spawn_blocking(move || aggregator.collect())
        .await
        .map_err(|e| ApiError::internal_error(format!("Scrape task failed: {}", e)))?;

    match merged {
        Ok(merged) => Ok((
            StatusCode::OK,
            [(header::CONTENT_TYPE, TEXT_CONTENT_TYPE)],
            merged.render(),
        )),
        Err(e @ MirrorError::MetricsDirMissing { .. }) => {
            state.exit.trigger(WorkerExit::MetricsDirLost);
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}
