//! Mirrorgate Core - shared types
//!
//! Document model, error taxonomy, environment configuration and process exit
//! codes. Every other crate in the workspace depends on this one; it holds no
//! I/O beyond reading the environment.

pub mod config;
pub mod document;
pub mod error;
pub mod exit;
pub mod health;

pub use config::{
    env_flag, env_parse, process_env, CacheSettings, EnvLookup, StoreBackendKind, StoreSettings, TimeZoneSpec,
    WritePolicy, DEFAULT_CACHE_TTL_SECS, DEFAULT_METRICS_DIR, MAX_CACHE_TTL_SECS, MAX_CALL_TIMEOUT_MS,
};
pub use document::{
    compute_etag, validate_value_size, DocumentKey, DocumentRecord, Timestamp,
    DEFAULT_MAX_VALUE_BYTES, MAX_KEY_LEN,
};
pub use error::{ConfigError, MirrorError, MirrorResult, ValidationError};
pub use exit::WorkerExit;
pub use health::{ComponentCheck, HealthStatus};
