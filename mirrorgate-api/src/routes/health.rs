//! Health Check Endpoints
//!
//! - /health/ping - Simple responder check
//! - /health/live - Process liveness, probed by the supervisor
//! - /health/ready - Store, cache and metrics directory probe
//!
//! None of these are instrumented.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use mirrorgate_core::{ComponentCheck, HealthStatus, WorkerExit};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

// ============================================================================
// TYPES
// ============================================================================

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct HealthResponse {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HealthDetails>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct HealthDetails {
    pub components: Vec<ComponentCheck>,
    pub version: String,
    pub worker_index: u32,
    pub pid: u32,
    pub uptime_seconds: u64,
}

// ============================================================================
// HANDLERS
// ============================================================================

/// GET /health/ping - Simple pong response
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/health/ping",
    tag = "Health",
    responses(
        (status = 200, description = "Service is responding", body = String),
    ),
))]
pub async fn ping() -> impl IntoResponse {
    (StatusCode::OK, "pong")
}

/// GET /health/live - Process liveness check
///
/// Fails once the worker has decided to exit, or when its metrics directory
/// has gone away (which also starts the exit).
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/health/live",
    tag = "Health",
    responses(
        (status = 200, description = "Process is alive", body = HealthResponse),
        (status = 503, description = "Process is shutting down", body = HealthResponse),
    ),
))]
pub async fn liveness(State(state): State<AppState>) -> impl IntoResponse {
    if let Err(e) = state.shard.check_dir() {
        tracing::error!(error = %e, "Liveness check found the metrics directory missing");
        state.exit.trigger(WorkerExit::MetricsDirLost);
    }

    let response = match state.exit.current() {
        None => HealthResponse {
            status: HealthStatus::Healthy,
            message: Some("Process is alive".to_string()),
            details: None,
        },
        Some(exit) => HealthResponse {
            status: HealthStatus::Unhealthy,
            message: Some(format!("Shutting down: {}", exit)),
            details: None,
        },
    };

    (status_code(response.status), Json(response))
}

/// GET /health/ready - Readiness check
///
/// A failing store makes the worker unhealthy; a failing cache only degrades
/// it, since reads fall back to the store.
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/health/ready",
    tag = "Health",
    responses(
        (status = 200, description = "Service is ready (possibly degraded)", body = HealthResponse),
        (status = 503, description = "Service is not ready", body = HealthResponse),
    ),
))]
pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let (store, cache) = tokio::join!(state.accessor.check_store(), state.accessor.check_cache());
    let metrics = match state.shard.check_dir() {
        Ok(()) => ComponentCheck::healthy("metrics"),
        Err(e) => ComponentCheck::unhealthy("metrics", e.to_string()),
    };

    let components = vec![store, cache, metrics];
    let overall = components
        .iter()
        .fold(HealthStatus::Healthy, |acc, c| acc.worst(c.status));

    let response = HealthResponse {
        status: overall,
        message: None,
        details: Some(HealthDetails {
            components,
            version: env!("CARGO_PKG_VERSION").to_string(),
            worker_index: state.config.worker_index,
            pid: state.pid,
            uptime_seconds: state.start_time.elapsed().as_secs(),
        }),
    };

    (status_code(overall), Json(response))
}

fn status_code(status: HealthStatus) -> StatusCode {
    match status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    }
}

// ============================================================================
// ROUTER
// ============================================================================

/// Create health check router.
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/ping", get(ping))
        .route("/live", get(liveness))
        .route("/ready", get(readiness))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degraded_still_serves() {
        assert_eq!(status_code(HealthStatus::Healthy), StatusCode::OK);
        assert_eq!(status_code(HealthStatus::Degraded), StatusCode::OK);
        assert_eq!(
            status_code(HealthStatus::Unhealthy),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_health_response_serialization() {
        let response = HealthResponse {
            status: HealthStatus::Degraded,
            message: None,
            details: None,
        };

        let json = serde_json::to_string(&response).unwrap();
        assert_eq!(json, "{\"status\":\"degraded\"}");
    }
}
