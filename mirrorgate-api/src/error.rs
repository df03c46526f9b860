//! Error Types for Mirrorgate API
//!
//! This module defines error handling for the HTTP layer, including:
//! - ApiError struct for structured error responses
//! - ErrorCode enum for categorizing errors
//! - IntoResponse implementation for Axum HTTP responses
//! - The mapping from the storage error taxonomy to HTTP statuses
//!
//! All errors are serialized as JSON with appropriate HTTP status codes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use mirrorgate_core::{MirrorError, ValidationError};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Error codes for API responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================================================
    // Validation Errors (400, 413)
    // ========================================================================
    /// Request validation failed
    ValidationFailed,

    /// Document body exceeds the configured limit
    PayloadTooLarge,

    // ========================================================================
    // Not Found Errors (404)
    // ========================================================================
    /// Requested document does not exist
    DocumentNotFound,

    // ========================================================================
    // Server Errors (500, 503)
    // ========================================================================
    /// Internal server error
    InternalError,

    /// Persistent document store is unreachable or timed out
    StoreUnavailable,

    /// Cache tier is unreachable or timed out
    CacheUnavailable,

    /// Metrics directory is gone; the worker is shutting down
    MetricsUnavailable,
}

impl ErrorCode {
    /// Get the HTTP status code for this error code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::ValidationFailed => StatusCode::BAD_REQUEST,

            ErrorCode::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,

            ErrorCode::DocumentNotFound => StatusCode::NOT_FOUND,

            ErrorCode::StoreUnavailable
            | ErrorCode::CacheUnavailable
            | ErrorCode::MetricsUnavailable => StatusCode::SERVICE_UNAVAILABLE,

            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get a default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::ValidationFailed => "Request validation failed",
            ErrorCode::PayloadTooLarge => "Document exceeds the size limit",
            ErrorCode::DocumentNotFound => "Document not found",
            ErrorCode::InternalError => "Internal server error",
            ErrorCode::StoreUnavailable => "Document store temporarily unavailable",
            ErrorCode::CacheUnavailable => "Cache tier temporarily unavailable",
            ErrorCode::MetricsUnavailable => "Metrics directory unavailable",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured error response for API operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ApiError {
    /// Error code categorizing the error
    pub code: ErrorCode,
    /// Human-readable error message
    pub message: String,
    /// Optional additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Create a new API error with the given code, using the default message.
    pub fn from_code(code: ErrorCode) -> Self {
        Self {
            code,
            message: code.default_message().to_string(),
            details: None,
        }
    }

    /// Add additional details to the error.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    /// Create a ValidationFailed error.
    pub fn validation_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationFailed, message)
    }

    /// Create a DocumentNotFound error.
    pub fn document_not_found(key: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::DocumentNotFound,
            format!("Document {} not found", key),
        )
    }

    /// Create an InternalError.
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

// ============================================================================
// AXUM INTEGRATION
// ============================================================================

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(self);
        (status, body).into_response()
    }
}

// ============================================================================
// CONVERSIONS FROM STORAGE ERRORS
// ============================================================================

/// Map the storage taxonomy onto HTTP responses.
///
/// Backend detail stays in the logs; the response carries only the kind.
impl From<MirrorError> for ApiError {
    fn from(err: MirrorError) -> Self {
        match err {
            MirrorError::Validation(ValidationError::ValueTooLarge { size, max }) => {
                ApiError::new(
                    ErrorCode::PayloadTooLarge,
                    format!("Document is {} bytes, maximum is {}", size, max),
                )
                .with_details(serde_json::json!({ "size": size, "max": max }))
            }
            MirrorError::Validation(e) => ApiError::validation_failed(e.to_string()),
            MirrorError::StoreUnavailable { reason } => {
                tracing::error!(reason = %reason, "Document store unavailable");
                ApiError::from_code(ErrorCode::StoreUnavailable)
            }
            MirrorError::CacheUnavailable { reason } => {
                tracing::warn!(reason = %reason, "Cache tier unavailable");
                ApiError::from_code(ErrorCode::CacheUnavailable)
            }
            MirrorError::MetricsDirMissing { path } => {
                tracing::error!(path = %path.display(), "Metrics directory missing");
                ApiError::from_code(ErrorCode::MetricsUnavailable)
            }
            MirrorError::ShardCorrupt { path, reason } => {
                tracing::error!(path = %path.display(), reason = %reason, "Metrics shard error");
                ApiError::internal_error("Metrics shard error")
            }
            MirrorError::Config(e) => ApiError::internal_error(e.to_string()),
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        MirrorError::from(err).into()
    }
}

// ============================================================================
// RESULT TYPE ALIAS
// ============================================================================

/// Result type alias for API operations.
pub type ApiResult<T> = Result<T, ApiError>;
