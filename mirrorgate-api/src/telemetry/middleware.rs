//! Axum Middleware for HTTP Request Tracing and Metrics
//!
//! Wraps every instrumented request in a tracing span, records it in the
//! worker's Prometheus instruments, and flushes the shard file before the
//! response leaves the process. A scrape that starts after a client has seen
//! its response therefore always counts that request.
//!
//! Routes are labelled by their matched template (`/documents/:key`), never by
//! the raw URI, so keys do not become label values.

use axum::{
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::Response,
};
use mirrorgate_core::{MirrorError, WorkerExit};
use std::time::Instant;
use tracing::{info_span, Instrument};

use crate::state::AppState;

/// Label used when no route matched.
const UNMATCHED_PATH: &str = "unmatched";

/// Paths served without instrumentation.
fn is_excluded(path: &str) -> bool {
    path == "/metrics"
        || path == "/openapi.json"
        || path == "/health"
        || path.starts_with("/health/")
}

/// Observability middleware for Axum.
pub async fn observability_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if is_excluded(&path) {
        return next.run(request).await;
    }

    let start = Instant::now();
    let method = request.method().clone();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| UNMATCHED_PATH.to_string());

    let span = info_span!(
        "http_request",
        http.method = %method,
        http.target = %path,
        http.route = %route,
        worker = state.config.worker_index,
    );

    let response = next.run(request).instrument(span).await;

    let duration = start.elapsed();
    let status = response.status();
    state
        .metrics
        .record_request(method.as_str(), &route, status.as_u16(), duration);

    flush_shard(&state).await;

    tracing::info!(
        method = %method,
        path = %path,
        route = %route,
        status = status.as_u16(),
        duration_ms = duration.as_millis(),
        "Request completed"
    );

    response
}

/// Persist the instruments to the shard file on the blocking pool.
///
/// Losing the metrics directory is fatal to the worker: the response still
/// goes out, then the server drains and the process exits so the supervisor
/// can respawn it into the new directory.
pub(crate) async fn flush_shard(state: &AppState) {
    let shard = state.shard.clone();
    let metrics = state.metrics.clone();

    match tokio::task::spawn_blocking(move || shard.flush(&metrics)).await {
        Ok(Ok(())) => {}
        Ok(Err(MirrorError::MetricsDirMissing { path })) => {
            tracing::error!(path = %path.display(), "Metrics directory lost, shutting down");
            state.exit.trigger(WorkerExit::MetricsDirLost);
        }
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Shard flush failed");
        }
        Err(e) => {
            tracing::error!(error = %e, "Shard flush task failed");
        }
    }
}
