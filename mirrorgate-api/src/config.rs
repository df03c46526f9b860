//! Worker Configuration Module
//!
//! Everything a worker process reads from its environment, parsed and
//! validated once at startup. A parse failure is a configuration error and
//! the worker exits before binding anything.

use std::path::PathBuf;
use std::time::Duration;

use mirrorgate_core::{
    env_parse, process_env, CacheSettings, ConfigError, EnvLookup, StoreSettings, TimeZoneSpec,
    DEFAULT_MAX_VALUE_BYTES, DEFAULT_METRICS_DIR,
};

use crate::db::DbConfig;

// ============================================================================
// API CONFIGURATION
// ============================================================================

/// HTTP-level settings for one worker.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Listen host.
    pub bind: String,

    /// Listen port. The supervisor hands each worker its own.
    pub port: u16,

    /// Position of this worker in the pool.
    pub worker_index: u32,

    /// Allowed CORS origins (comma-separated in env var).
    /// Empty means allow all origins.
    pub cors_origins: Vec<String>,

    /// Max age for CORS preflight cache in seconds.
    pub cors_max_age_secs: u64,

    /// Largest document body accepted by `PUT /documents/:key`.
    pub max_value_bytes: usize,

    /// Shared shard directory.
    pub metrics_dir: PathBuf,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8000,
            worker_index: 0,
            cors_origins: Vec::new(),
            cors_max_age_secs: 86400,
            max_value_bytes: DEFAULT_MAX_VALUE_BYTES,
            metrics_dir: PathBuf::from(DEFAULT_METRICS_DIR),
        }
    }
}

impl ApiConfig {
    /// Create ApiConfig from environment variables.
    ///
    /// Environment variables:
    /// - `MIRRORGATE_BIND`: listen host (default: 0.0.0.0)
    /// - `PORT`: listen port (default: 8000)
    /// - `WORKER_INDEX`: pool position (default: 0)
    /// - `MIRRORGATE_CORS_ORIGINS`: comma-separated allowed origins (empty = allow all)
    /// - `MIRRORGATE_CORS_MAX_AGE_SECS`: preflight cache duration (default: 86400)
    /// - `MIRRORGATE_MAX_VALUE_BYTES`: document size limit (default: 20 MiB)
    /// - `METRICS_DIR`: shard directory (default: /tmp/mirrorgate-metrics)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&process_env)
    }

    pub fn from_lookup(env: &impl EnvLookup) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let cors_origins = env
            .lookup("MIRRORGATE_CORS_ORIGINS")
            .map(|s| {
                s.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let max_value_bytes = env_parse(env, "MIRRORGATE_MAX_VALUE_BYTES", defaults.max_value_bytes)?;
        if max_value_bytes == 0 {
            return Err(ConfigError::invalid(
                "MIRRORGATE_MAX_VALUE_BYTES",
                "0",
                "must be greater than zero",
            ));
        }

        Ok(Self {
            bind: env_parse(env, "MIRRORGATE_BIND", defaults.bind)?,
            port: env_parse(env, "PORT", defaults.port)?,
            worker_index: env_parse(env, "WORKER_INDEX", defaults.worker_index)?,
            cors_origins,
            cors_max_age_secs: env_parse(env, "MIRRORGATE_CORS_MAX_AGE_SECS", defaults.cors_max_age_secs)?,
            max_value_bytes,
            metrics_dir: env_parse(env, "METRICS_DIR", defaults.metrics_dir)?,
        })
    }

    /// `host:port` this worker listens on.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

// ============================================================================
// WORKER CONFIGURATION
// ============================================================================

/// Complete configuration of one worker process.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub api: ApiConfig,
    /// Number of workers sharing the store (`MIRRORGATE_WORKERS`, default 1).
    pub pool_size: u32,
    pub cache: CacheSettings,
    pub store: StoreSettings,
    /// Postgres connection, used when the store backend is `postgres`.
    pub db: DbConfig,
    pub timezone: TimeZoneSpec,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&process_env)
    }

    pub fn from_lookup(env: &impl EnvLookup) -> Result<Self, ConfigError> {
        let pool_size = env_parse(env, "MIRRORGATE_WORKERS", 1u32)?.max(1);
        let mut cache = CacheSettings::from_lookup(env)?;
        // Per-process memory tiers cannot see each other's invalidations.
        if cache.url.is_none() && pool_size > 1 {
            cache.enabled = false;
        }

        Ok(Self {
            api: ApiConfig::from_lookup(env)?,
            pool_size,
            cache,
            store: StoreSettings::from_lookup(env)?,
            db: DbConfig::from_lookup(env)?,
            timezone: TimeZoneSpec::from_lookup(env)?,
        })
    }

    /// Whether the cache was switched off because the pool has no shared tier.
    pub fn cache_disabled_for_pool(&self) -> bool {
        self.cache.url.is_none() && self.pool_size > 1
    }

    /// Store call timeout, shared by both backends.
    pub fn store_timeout(&self) -> Duration {
        self.store.timeout
    }
}
