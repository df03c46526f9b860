//! Cache invalidation route.

use axum::{
    extract::{Path, State},
    http::StatusCode,
};
use mirrorgate_core::DocumentKey;
use mirrorgate_storage::WorkerAccessor;

use crate::error::{ApiError, ApiResult};

/// DELETE /cache/:key - Drop the cached copy of a document
///
/// Idempotent. The store is not touched. There is no fallback when the cache
/// tier is down, so that case is reported as 503.
#[cfg_attr(feature = "openapi", utoipa::path(
    delete,
    path = "/cache/{key}",
    tag = "Cache",
    params(("key" = String, Path, description = "Document key")),
    responses(
        (status = 204, description = "Cached copy removed (or absent)"),
        (status = 400, description = "Invalid key", body = ApiError),
        (status = 503, description = "Cache tier unavailable", body = ApiError),
    ),
))]
pub async fn invalidate_cache(
    State(accessor): State<WorkerAccessor>,
    Path(key): Path<String>,
) -> ApiResult<StatusCode> {
    let key = DocumentKey::parse(key)?;
    let removed = accessor.invalidate(&key).await?;
    tracing::debug!(key = %key, removed, "Cache entry invalidated");
    Ok(StatusCode::NO_CONTENT)
}
