//! OpenAPI Specification for the Mirrorgate worker API
//!
//! Generated with utoipa from the route annotations and response types.

use utoipa::OpenApi;

use crate::error::{ApiError, ErrorCode};
use crate::routes::documents::PutResponse;
use crate::routes::health::{HealthDetails, HealthResponse};
use crate::routes::statistics::{CacheStatistics, StatisticsResponse};
use crate::routes::{cache, documents, health, statistics, ServiceBanner};
use crate::telemetry::metrics;
use mirrorgate_core::{ComponentCheck, HealthStatus};

/// OpenAPI document for the worker API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Mirrorgate API",
        version = "0.4.0",
        description = "Mirroring API gateway: documents served through a shared cache tier in front of a durable store",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "http://localhost:8000", description = "Local Development")
    ),
    tags(
        (name = "Service", description = "Service banner"),
        (name = "Documents", description = "Document reads and writes through the cache"),
        (name = "Cache", description = "Cache tier maintenance"),
        (name = "Statistics", description = "Per-worker statistics"),
        (name = "Health", description = "Liveness and readiness probes"),
        (name = "Metrics", description = "Prometheus exposition merged across workers")
    ),
    paths(
        crate::routes::banner,
        documents::get_document,
        documents::put_document,
        cache::invalidate_cache,
        statistics::statistics,
        metrics::metrics_handler,
        health::ping,
        health::liveness,
        health::readiness,
    ),
    components(schemas(
        ServiceBanner,
        PutResponse,
        StatisticsResponse,
        CacheStatistics,
        HealthResponse,
        HealthDetails,
        HealthStatus,
        ComponentCheck,
        ApiError,
        ErrorCode,
    ))
)]
pub struct ApiDoc;

impl ApiDoc {
    /// Serialize the document as pretty-printed JSON.
    pub fn to_json() -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&Self::openapi())
    }
}
