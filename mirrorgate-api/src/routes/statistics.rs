//! Worker statistics route.

use axum::{extract::State, Json};
use mirrorgate_storage::CacheStats;
use serde::{Deserialize, Serialize};

use crate::error::ApiResult;
use crate::state::AppState;

/// Per-worker accessor counters since start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CacheStatistics {
    pub hits: u64,
    pub misses: u64,
    pub bypasses: u64,
    pub errors: u64,
    pub hit_rate: f64,
}

impl From<CacheStats> for CacheStatistics {
    fn from(stats: CacheStats) -> Self {
        Self {
            hits: stats.hits,
            misses: stats.misses,
            bypasses: stats.bypasses,
            errors: stats.errors,
            hit_rate: stats.hit_rate(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct StatisticsResponse {
    /// Documents in the shared store.
    pub documents: u64,
    pub worker_index: u32,
    pub pid: u32,
    pub uptime_seconds: u64,
    /// Counters of this worker only.
    pub cache: CacheStatistics,
}

/// GET /statistics - Store size and this worker's identity
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/statistics",
    tag = "Statistics",
    responses(
        (status = 200, description = "Worker statistics", body = StatisticsResponse),
        (status = 503, description = "Document store unavailable", body = crate::error::ApiError),
    ),
))]
pub async fn statistics(State(state): State<AppState>) -> ApiResult<Json<StatisticsResponse>> {
    let documents = state.accessor.document_count().await?;

    Ok(Json(StatisticsResponse {
        documents,
        worker_index: state.config.worker_index,
        pid: state.pid,
        uptime_seconds: state.start_time.elapsed().as_secs(),
        cache: state.accessor.stats().into(),
    }))
}
