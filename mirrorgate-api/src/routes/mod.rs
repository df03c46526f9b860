//! REST API Routes Module
//!
//! The worker's full HTTP surface:
//! - Documents read and written through the cache-aside accessor
//! - Cache invalidation
//! - Worker statistics
//! - Health checks
//! - Merged Prometheus exposition at /metrics
//! - OpenAPI document at /openapi.json

pub mod cache;
pub mod documents;
pub mod health;
pub mod statistics;

use std::time::Duration;

use axum::{
    extract::{DefaultBodyLimit, State},
    http::{header, HeaderValue, Method},
    middleware::from_fn_with_state,
    response::IntoResponse,
    routing::{delete, get},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};

use crate::config::ApiConfig;
use crate::state::AppState;
use crate::telemetry::{metrics_handler, observability_middleware};

// ============================================================================
// BANNER
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ServiceBanner {
    pub service: String,
    pub version: String,
    pub worker_index: u32,
    pub pid: u32,
}

/// GET / - Service banner
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/",
    tag = "Service",
    responses((status = 200, description = "Service banner", body = ServiceBanner)),
))]
pub async fn banner(State(state): State<AppState>) -> Json<ServiceBanner> {
    Json(ServiceBanner {
        service: "mirrorgate".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        worker_index: state.config.worker_index,
        pid: state.pid,
    })
}

// ============================================================================
// OPENAPI ENDPOINT
// ============================================================================

/// Handler for /openapi.json endpoint.
#[cfg(feature = "openapi")]
async fn openapi_json() -> impl IntoResponse {
    use utoipa::OpenApi;
    Json(crate::openapi::ApiDoc::openapi())
}

// ============================================================================
// CORS LAYER
// ============================================================================

/// Build the CORS layer from ApiConfig.
///
/// With no configured origins every origin is allowed.
fn build_cors_layer(config: &ApiConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::IF_NONE_MATCH,
        ])
        .expose_headers([
            documents::X_CACHE,
            documents::X_DOCUMENT_VERSION,
            header::ETAG,
            header::CACHE_CONTROL,
        ])
        .max_age(Duration::from_secs(config.cors_max_age_secs));

    if config.cors_origins.is_empty() {
        tracing::info!("CORS: allowing all origins");
        cors.allow_origin(Any)
    } else {
        tracing::info!("CORS: allowing origins: {:?}", config.cors_origins);
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        cors.allow_origin(origins)
    }
}

// ============================================================================
// ROUTER
// ============================================================================

/// Create the worker router.
///
/// # Middleware Order (outer to inner)
/// 1. CORS - handles preflight requests
/// 2. Compression
/// 3. Observability - spans, request metrics, shard flush
/// 4. Body limit - rejects oversize documents before they are buffered
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state.config);
    let body_limit = DefaultBodyLimit::max(state.config.max_value_bytes);

    let router = Router::new()
        .route("/", get(banner))
        .route(
            "/documents/:key",
            get(documents::get_document).put(documents::put_document),
        )
        .route("/cache/:key", delete(cache::invalidate_cache))
        .route("/statistics", get(statistics::statistics))
        .route("/metrics", get(metrics_handler))
        .nest("/health", health::create_router());

    #[cfg(feature = "openapi")]
    let router = router.route("/openapi.json", get(openapi_json));

    router
        .layer(body_limit)
        .layer(from_fn_with_state(state.clone(), observability_middleware))
        .layer(CompressionLayer::new())
        .layer(cors)
        .with_state(state)
}
