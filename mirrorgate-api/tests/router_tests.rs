//! Router Tests for the Worker HTTP Surface
//!
//! **Property 1: Cache-Aside Over HTTP**
//!
//! For any document written through `PUT /documents/:key`:
//! - The first read is a cache miss served from the store
//! - The next read is a cache hit with the same version and entity tag
//! - `DELETE /cache/:key` drops the cached copy, not the document
//!
//! **Property 2: Failure Mapping**
//!
//! A store outage surfaces as 503, a cache outage only degrades reads, and a
//! lost metrics directory stops the worker with exit code 5.
//!
//! **Property 3: Instrumentation**
//!
//! Every routed request except health, metrics and OpenAPI is counted in the
//! worker's shard under its route template.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use mirrorgate_api::{create_router, ApiConfig, AppState};
use mirrorgate_api::routes::documents::PutResponse;
use mirrorgate_api::routes::statistics::StatisticsResponse;
use mirrorgate_api::telemetry::MetricsObserver;
use mirrorgate_core::{CacheSettings, WorkerExit};
use mirrorgate_metrics::{Aggregator, ShardWriter, WorkerMetrics};
use mirrorgate_storage::{CacheAside, CacheTier, DocumentStore, WorkerAccessor};
use mirrorgate_test_utils::fixtures::{cache_settings, metrics_dir};
use mirrorgate_test_utils::{FlakyCacheTier, FlakyStore};
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

// ============================================================================
// TEST HARNESS
// ============================================================================

struct Harness {
    app: Router,
    state: AppState,
    cache: Arc<FlakyCacheTier>,
    store: Arc<FlakyStore>,
    dir: PathBuf,
    _temp: TempDir,
}

fn harness() -> Harness {
    harness_with(cache_settings(Duration::from_secs(60)), 1024)
}

fn harness_with(settings: CacheSettings, max_value_bytes: usize) -> Harness {
    let (temp, dir) = metrics_dir();
    let cache = Arc::new(FlakyCacheTier::new());
    let store = Arc::new(FlakyStore::new());
    let metrics = WorkerMetrics::new().expect("register metrics");

    let accessor: WorkerAccessor = CacheAside::new(
        Arc::clone(&cache) as Arc<dyn CacheTier>,
        Arc::clone(&store) as Arc<dyn DocumentStore>,
        settings,
    )
    .with_observer(Arc::new(MetricsObserver::new(metrics.clone())))
    .with_max_value_bytes(max_value_bytes);

    let shard = ShardWriter::create(&dir, Some(0)).expect("claim shard");
    let config = ApiConfig {
        metrics_dir: dir.clone(),
        max_value_bytes,
        ..ApiConfig::default()
    };

    let state = AppState::new(accessor, metrics, shard, config);
    Harness {
        app: create_router(state.clone()),
        state,
        cache,
        store,
        dir,
        _temp: temp,
    }
}

async fn send(app: &Router, request: Request<Body>) -> Response {
    app.clone().oneshot(request).await.expect("router is infallible")
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn put(uri: &str, body: impl Into<Body>) -> Request<Body> {
    Request::put(uri).body(body.into()).unwrap()
}

fn delete(uri: &str) -> Request<Body> {
    Request::delete(uri).body(Body::empty()).unwrap()
}

async fn body_bytes(response: Response) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body")
        .to_vec()
}

async fn body_json(response: Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).expect("json body")
}

fn header_str<'a>(response: &'a Response, name: &str) -> &'a str {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

// ============================================================================
// DOCUMENTS
// ============================================================================

#[tokio::test]
async fn test_put_then_get_misses_then_hits() {
    let h = harness();

    let response = send(&h.app, put("/documents/alpha", "hello")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let stored: PutResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(stored.key, "alpha");
    assert_eq!(stored.version, 1);
    assert_eq!(stored.size, 5);
    assert_eq!(stored.cache, "invalidated");

    let first = send(&h.app, get("/documents/alpha")).await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(header_str(&first, "x-cache"), "miss");
    assert_eq!(header_str(&first, "x-document-version"), "1");
    assert_eq!(header_str(&first, "cache-control"), "public, max-age=60");
    assert_eq!(header_str(&first, "content-type"), "application/octet-stream");
    let etag = header_str(&first, "etag").to_string();
    assert!(etag.starts_with('"') && etag.ends_with('"'));
    assert_eq!(body_bytes(first).await, b"hello");

    let second = send(&h.app, get("/documents/alpha")).await;
    assert_eq!(header_str(&second, "x-cache"), "hit");
    assert_eq!(header_str(&second, "etag"), etag);
    assert_eq!(h.store.reads(), 1);
}

#[tokio::test]
async fn test_overwrite_bumps_version() {
    let h = harness();
    send(&h.app, put("/documents/k", "v1")).await;
    send(&h.app, get("/documents/k")).await;

    let response = send(&h.app, put("/documents/k", "v2")).await;
    let stored: PutResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(stored.version, 2);

    let read = send(&h.app, get("/documents/k")).await;
    assert_eq!(header_str(&read, "x-cache"), "miss");
    assert_eq!(header_str(&read, "x-document-version"), "2");
    assert_eq!(body_bytes(read).await, b"v2");
}

#[tokio::test]
async fn test_missing_document_is_404_json() {
    let h = harness();
    let response = send(&h.app, get("/documents/nope")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["code"], "DOCUMENT_NOT_FOUND");
}

#[tokio::test]
async fn test_control_character_key_is_rejected() {
    let h = harness();
    let response = send(&h.app, put("/documents/bad%01key", "x")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["code"], "VALIDATION_FAILED");
}

#[tokio::test]
async fn test_oversize_body_is_rejected() {
    let h = harness_with(cache_settings(Duration::from_secs(60)), 16);
    let response = send(&h.app, put("/documents/big", vec![b'x'; 17])).await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

    let exact = send(&h.app, put("/documents/big", vec![b'x'; 16])).await;
    assert_eq!(exact.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_refresh_bypasses_cache() {
    let h = harness();
    send(&h.app, put("/documents/r", "data")).await;
    send(&h.app, get("/documents/r")).await;

    let response = send(&h.app, get("/documents/r?refresh=true")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, "x-cache"), "bypass");
    assert_eq!(h.store.reads(), 2);
}

#[tokio::test]
async fn test_if_none_match_returns_304() {
    let h = harness();
    send(&h.app, put("/documents/e", "tagged")).await;
    let first = send(&h.app, get("/documents/e")).await;
    let etag = header_str(&first, "etag").to_string();

    let request = Request::get("/documents/e")
        .header(header::IF_NONE_MATCH, format!("\"other\", W/{}", etag))
        .body(Body::empty())
        .unwrap();
    let response = send(&h.app, request).await;
    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    assert_eq!(header_str(&response, "etag"), etag);
    assert!(body_bytes(response).await.is_empty());
}

// ============================================================================
// CACHE INVALIDATION AND OUTAGES
// ============================================================================

#[tokio::test]
async fn test_invalidate_drops_cached_copy_only() {
    let h = harness();
    send(&h.app, put("/documents/i", "keep")).await;
    send(&h.app, get("/documents/i")).await;

    let response = send(&h.app, delete("/cache/i")).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let read = send(&h.app, get("/documents/i")).await;
    assert_eq!(read.status(), StatusCode::OK);
    assert_eq!(header_str(&read, "x-cache"), "miss");
}

#[tokio::test]
async fn test_invalidate_with_cache_down_is_503() {
    let h = harness();
    h.cache.set_available(false);
    let response = send(&h.app, delete("/cache/i")).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["code"], "CACHE_UNAVAILABLE");
}

#[tokio::test]
async fn test_cache_outage_serves_from_store() {
    let h = harness();
    send(&h.app, put("/documents/c", "still here")).await;
    h.cache.set_available(false);

    let response = send(&h.app, get("/documents/c")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, "x-cache"), "bypass");
    assert_eq!(body_bytes(response).await, b"still here");
    assert!(h.cache.failures() > 0);
}

#[tokio::test]
async fn test_store_outage_is_503() {
    let h = harness();
    h.store.set_available(false);

    let read = send(&h.app, get("/documents/s")).await;
    assert_eq!(read.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(read).await["code"], "STORE_UNAVAILABLE");

    let write = send(&h.app, put("/documents/s", "x")).await;
    assert_eq!(write.status(), StatusCode::SERVICE_UNAVAILABLE);
}

// ============================================================================
// HEALTH
// ============================================================================

#[tokio::test]
async fn test_readiness_reflects_components() {
    let h = harness();
    let healthy = send(&h.app, get("/health/ready")).await;
    assert_eq!(healthy.status(), StatusCode::OK);
    assert_eq!(body_json(healthy).await["status"], "healthy");

    h.cache.set_available(false);
    let degraded = send(&h.app, get("/health/ready")).await;
    assert_eq!(degraded.status(), StatusCode::OK);
    assert_eq!(body_json(degraded).await["status"], "degraded");

    h.store.set_available(false);
    let unhealthy = send(&h.app, get("/health/ready")).await;
    assert_eq!(unhealthy.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(unhealthy).await["status"], "unhealthy");
}

#[tokio::test]
async fn test_ping_and_liveness() {
    let h = harness();
    let ping = send(&h.app, get("/health/ping")).await;
    assert_eq!(ping.status(), StatusCode::OK);
    assert_eq!(body_bytes(ping).await, b"pong");

    let live = send(&h.app, get("/health/live")).await;
    assert_eq!(live.status(), StatusCode::OK);
}

// ============================================================================
// METRICS
// ============================================================================

#[tokio::test]
async fn test_requests_are_counted_by_route_template() {
    let h = harness();
    send(&h.app, put("/documents/a", "1")).await;
    send(&h.app, get("/documents/a")).await;
    send(&h.app, get("/documents/b")).await;
    send(&h.app, get("/health/live")).await;
    send(&h.app, get("/health/ready")).await;

    let merged = Aggregator::new(&h.dir).collect().unwrap();
    let route = ("path", "/documents/:key");
    assert_eq!(
        merged.value("requests_total", &[("method", "PUT"), route, ("status", "200")]),
        Some(1.0)
    );
    assert_eq!(
        merged.value("requests_total", &[("method", "GET"), route, ("status", "200")]),
        Some(1.0)
    );
    assert_eq!(
        merged.value("requests_total", &[("method", "GET"), route, ("status", "404")]),
        Some(1.0)
    );
    assert_eq!(merged.sum("requests_total", &[]), 3.0);
}

#[tokio::test]
async fn test_metrics_endpoint_renders_merged_exposition() {
    let h = harness();
    send(&h.app, put("/documents/m", "1")).await;
    send(&h.app, get("/does/not/exist")).await;

    let response = send(&h.app, get("/metrics")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(header_str(&response, "content-type").starts_with("text/plain"));

    let text = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(text.contains("# TYPE requests_total counter"));
    assert!(text.contains("path=\"/documents/:key\""));
    assert!(text.contains("path=\"unmatched\""));
    assert!(!text.contains("path=\"/metrics\""));
    assert!(!text.contains("path=\"/health"));
}

#[tokio::test]
async fn test_lost_metrics_dir_requests_exit_5() {
    let h = harness();
    std::fs::remove_dir_all(&h.dir).unwrap();

    let response = send(&h.app, put("/documents/x", "1")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(h.state.exit.current(), Some(WorkerExit::MetricsDirLost));
    assert_eq!(WorkerExit::MetricsDirLost.code(), 5);

    let scrape = send(&h.app, get("/metrics")).await;
    assert_eq!(scrape.status(), StatusCode::SERVICE_UNAVAILABLE);

    let live = send(&h.app, get("/health/live")).await;
    assert_eq!(live.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_liveness_notices_lost_metrics_dir() {
    let h = harness();
    std::fs::remove_dir_all(&h.dir).unwrap();

    let live = send(&h.app, get("/health/live")).await;
    assert_eq!(live.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(h.state.exit.current(), Some(WorkerExit::MetricsDirLost));
}

// ============================================================================
// STATISTICS AND BANNER
// ============================================================================

#[tokio::test]
async fn test_statistics_report_store_and_counters() {
    let h = harness();
    send(&h.app, put("/documents/one", "1")).await;
    send(&h.app, put("/documents/two", "2")).await;
    send(&h.app, get("/documents/one")).await;
    send(&h.app, get("/documents/one")).await;

    let response = send(&h.app, get("/statistics")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let stats: StatisticsResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(stats.documents, 2);
    assert_eq!(stats.worker_index, 0);
    assert_eq!(stats.pid, std::process::id());
    assert_eq!(stats.cache.hits, 1);
    assert_eq!(stats.cache.misses, 1);
}

#[tokio::test]
async fn test_banner() {
    let h = harness();
    let response = send(&h.app, get("/")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["service"], "mirrorgate");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[cfg(feature = "openapi")]
#[tokio::test]
async fn test_openapi_document_is_served() {
    let h = harness();
    let response = send(&h.app, get("/openapi.json")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["paths"]["/documents/{key}"].is_object());
}
