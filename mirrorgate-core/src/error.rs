//! Error types for Mirrorgate operations

use std::path::PathBuf;
use thiserror::Error;

/// Request validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Document key must not be empty")]
    EmptyKey,

    #[error("Document key is {len} bytes, maximum is {max}")]
    KeyTooLong { len: usize, max: usize },

    #[error("Document key contains a control character at byte {position}")]
    InvalidKeyCharacter { position: usize },

    #[error("Document value is {size} bytes, maximum is {max}")]
    ValueTooLarge { size: usize, max: usize },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    pub fn invalid(field: &str, value: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// Master error type for the gateway.
///
/// The first four variants form the operational taxonomy: a cache outage is
/// recoverable (reads bypass the cache), a store outage fails the request, a
/// corrupt shard is skipped by the aggregator, and a missing metrics directory
/// is fatal for the process that observes it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MirrorError {
    #[error("Cache tier unavailable: {reason}")]
    CacheUnavailable { reason: String },

    #[error("Document store unavailable: {reason}")]
    StoreUnavailable { reason: String },

    #[error("Metrics shard {path} is corrupt: {reason}")]
    ShardCorrupt { path: PathBuf, reason: String },

    #[error("Metrics directory {path} is missing")]
    MetricsDirMissing { path: PathBuf },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl MirrorError {
    pub fn cache_unavailable(reason: impl std::fmt::Display) -> Self {
        MirrorError::CacheUnavailable {
            reason: reason.to_string(),
        }
    }

    pub fn store_unavailable(reason: impl std::fmt::Display) -> Self {
        MirrorError::StoreUnavailable {
            reason: reason.to_string(),
        }
    }

    pub fn shard_corrupt(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        MirrorError::ShardCorrupt {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn metrics_dir_missing(path: impl Into<PathBuf>) -> Self {
        MirrorError::MetricsDirMissing { path: path.into() }
    }

    /// Whether the caller can keep serving after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            MirrorError::CacheUnavailable { .. } | MirrorError::ShardCorrupt { .. }
        )
    }
}

/// Result type alias for Mirrorgate operations.
pub type MirrorResult<T> = Result<T, MirrorError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display_key_too_long() {
        let err = ValidationError::KeyTooLong { len: 600, max: 512 };
        let msg = format!("{}", err);
        assert!(msg.contains("600"));
        assert!(msg.contains("512"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::invalid("CACHE_TTL_SECONDS", "0", "must be greater than zero");
        let msg = format!("{}", err);
        assert!(msg.contains("CACHE_TTL_SECONDS"));
        assert!(msg.contains("must be greater than zero"));
    }

    #[test]
    fn test_shard_corrupt_display_names_path() {
        let err = MirrorError::shard_corrupt("/tmp/m/shard-1.json", "expected value at line 1");
        let msg = format!("{}", err);
        assert!(msg.contains("/tmp/m/shard-1.json"));
        assert!(msg.contains("expected value"));
    }

    #[test]
    fn test_recoverable_kinds() {
        assert!(MirrorError::cache_unavailable("down").is_recoverable());
        assert!(MirrorError::shard_corrupt("x", "bad").is_recoverable());
        assert!(!MirrorError::store_unavailable("down").is_recoverable());
        assert!(!MirrorError::metrics_dir_missing("/tmp/m").is_recoverable());
    }

    #[test]
    fn test_from_validation_error() {
        let err: MirrorError = ValidationError::EmptyKey.into();
        assert!(matches!(err, MirrorError::Validation(ValidationError::EmptyKey)));
        assert!(format!("{}", err).starts_with("Validation error"));
    }
}
