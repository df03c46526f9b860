//! Document REST API Routes
//!
//! Raw document bodies in and out. Every read goes through the cache-aside
//! accessor and reports where it was served from in `x-cache`.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use mirrorgate_core::{DocumentKey, DocumentRecord, Timestamp};
use mirrorgate_storage::ReadMode;
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");
pub const X_DOCUMENT_VERSION: HeaderName = HeaderName::from_static("x-document-version");

// ============================================================================
// TYPES
// ============================================================================

/// Query parameters for `GET /documents/:key`.
#[derive(Debug, Clone, Default, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::IntoParams))]
pub struct ReadParams {
    /// Skip the cache lookup and repopulate it from the store.
    #[serde(default)]
    pub refresh: bool,
}

/// Response body of `PUT /documents/:key`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct PutResponse {
    pub key: String,
    /// Version assigned by the store; 1 on first write.
    pub version: u64,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = DateTime))]
    pub updated_at: Timestamp,
    /// Stored body size in bytes.
    pub size: usize,
    /// What happened to the cached copy: invalidated, refreshed, stale or skipped.
    pub cache: String,
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// GET /documents/:key - Read a document through the cache
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/documents/{key}",
    tag = "Documents",
    params(
        ("key" = String, Path, description = "Document key"),
        ReadParams,
    ),
    responses(
        (status = 200, description = "Document body", body = Vec<u8>, content_type = "application/octet-stream"),
        (status = 304, description = "Body matches If-None-Match"),
        (status = 400, description = "Invalid key", body = ApiError),
        (status = 404, description = "Document not found", body = ApiError),
        (status = 503, description = "Document store unavailable", body = ApiError),
    ),
))]
pub async fn get_document(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(params): Query<ReadParams>,
    request_headers: HeaderMap,
) -> ApiResult<Response> {
    let key = DocumentKey::parse(key)?;
    let mode = if params.refresh {
        ReadMode::Refresh
    } else {
        ReadMode::Cached
    };

    let read = state
        .accessor
        .get(&key, mode)
        .await?
        .ok_or_else(|| ApiError::document_not_found(&key))?;

    let ttl = state.accessor.settings().ttl.as_secs();
    let mut headers = document_headers(&read.record, ttl)?;
    headers.insert(X_CACHE, HeaderValue::from_static(read.source.as_str()));

    if etag_matches(&request_headers, &read.record) {
        return Ok((StatusCode::NOT_MODIFIED, headers).into_response());
    }

    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    Ok((StatusCode::OK, headers, read.record.value).into_response())
}

/// PUT /documents/:key - Store a document and update the cache
#[cfg_attr(feature = "openapi", utoipa::path(
    put,
    path = "/documents/{key}",
    tag = "Documents",
    params(("key" = String, Path, description = "Document key")),
    request_body(content = Vec<u8>, content_type = "application/octet-stream"),
    responses(
        (status = 200, description = "Document stored", body = PutResponse),
        (status = 400, description = "Invalid key", body = ApiError),
        (status = 413, description = "Body exceeds the size limit", body = ApiError),
        (status = 503, description = "Document store unavailable", body = ApiError),
    ),
))]
pub async fn put_document(
    State(state): State<AppState>,
    Path(key): Path<String>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let key = DocumentKey::parse(key)?;
    let size = body.len();

    let outcome = state.accessor.put(&key, body.to_vec()).await?;

    tracing::debug!(
        key = %key,
        version = outcome.record.version,
        cache = outcome.cache.as_str(),
        "Document stored"
    );

    Ok(Json(PutResponse {
        key: key.into_inner(),
        version: outcome.record.version,
        updated_at: outcome.record.updated_at,
        size,
        cache: outcome.cache.as_str().to_string(),
    }))
}

// ============================================================================
// HELPERS
// ============================================================================

fn quoted_etag(record: &DocumentRecord) -> String {
    format!("\"{}\"", record.etag())
}

fn document_headers(record: &DocumentRecord, ttl_secs: u64) -> ApiResult<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(X_DOCUMENT_VERSION, HeaderValue::from(record.version));
    headers.insert(header::ETAG, header_value(quoted_etag(record))?);
    headers.insert(
        header::CACHE_CONTROL,
        header_value(format!("public, max-age={}", ttl_secs))?,
    );
    Ok(headers)
}

fn header_value(value: String) -> ApiResult<HeaderValue> {
    HeaderValue::from_str(&value)
        .map_err(|e| ApiError::internal_error(format!("Invalid header value: {}", e)))
}

/// Whether `If-None-Match` names the record's current entity tag.
fn etag_matches(request_headers: &HeaderMap, record: &DocumentRecord) -> bool {
    let Some(raw) = request_headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };
    let current = quoted_etag(record);
    raw.split(',').map(str::trim).any(|candidate| {
        candidate == "*" || candidate.trim_start_matches("W/") == current
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(value: &[u8]) -> DocumentRecord {
        DocumentRecord {
            key: DocumentKey::parse("k").unwrap(),
            value: value.to_vec(),
            version: 4,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_document_headers() {
        let headers = document_headers(&record(b"abc"), 60).unwrap();
        assert_eq!(headers[X_DOCUMENT_VERSION], "4");
        assert_eq!(headers[header::CACHE_CONTROL], "public, max-age=60");
        assert_eq!(
            headers[header::ETAG],
            "\"ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad\""
        );
    }

    #[test]
    fn test_etag_matching() {
        let record = record(b"abc");
        let mut headers = HeaderMap::new();
        assert!(!etag_matches(&headers, &record));

        headers.insert(header::IF_NONE_MATCH, HeaderValue::from_static("\"other\""));
        assert!(!etag_matches(&headers, &record));

        let list = format!("\"other\", W/{}", quoted_etag(&record));
        headers.insert(header::IF_NONE_MATCH, HeaderValue::from_str(&list).unwrap());
        assert!(etag_matches(&headers, &record));

        headers.insert(header::IF_NONE_MATCH, HeaderValue::from_static("*"));
        assert!(etag_matches(&headers, &record));
    }

    #[test]
    fn test_refresh_param_defaults_to_false() {
        let params: ReadParams = serde_json::from_str("{}").unwrap();
        assert!(!params.refresh);
    }
}
