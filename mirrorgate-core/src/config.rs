//! Environment configuration
//!
//! Settings shared by more than one crate live here: the cache-aside knobs,
//! the document store selection and the log timezone. Each settings type has
//! a `from_env()` constructor and a `from_lookup()` twin that takes any
//! [`EnvLookup`], so parsing can be exercised without touching the process
//! environment.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default cache entry lifetime in seconds.
pub const DEFAULT_CACHE_TTL_SECS: u64 = 3600;

/// Longest accepted cache entry lifetime (one year).
pub const MAX_CACHE_TTL_SECS: u64 = 365 * 24 * 3600;

/// Longest accepted timeout for a single cache or store call.
pub const MAX_CALL_TIMEOUT_MS: u64 = 60_000;

/// Default shard directory.
pub const DEFAULT_METRICS_DIR: &str = "/tmp/mirrorgate-metrics";

const DEFAULT_STORE_PATH: &str = "/tmp/mirrorgate-store";

/// Source of configuration values.
pub trait EnvLookup {
    fn lookup(&self, key: &str) -> Option<String>;
}

impl<F> EnvLookup for F
where
    F: Fn(&str) -> Option<String>,
{
    fn lookup(&self, key: &str) -> Option<String> {
        self(key)
    }
}

impl EnvLookup for HashMap<String, String> {
    fn lookup(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// Read from the real process environment.
pub fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn non_empty(env: &impl EnvLookup, field: &str) -> Option<String> {
    env.lookup(field)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse an optional variable, falling back to `default` when unset.
pub fn env_parse<T>(env: &impl EnvLookup, field: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match non_empty(env, field) {
        None => Ok(default),
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| ConfigError::invalid(field, raw.clone(), e.to_string())),
    }
}

/// Parse a boolean flag (`true/false`, `1/0`, `yes/no`, `on/off`).
pub fn env_flag(env: &impl EnvLookup, field: &str, default: bool) -> Result<bool, ConfigError> {
    match non_empty(env, field) {
        None => Ok(default),
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::invalid(field, raw, "expected a boolean")),
        },
    }
}

// ============================================================================
// CACHE SETTINGS
// ============================================================================

/// What a successful `put` does to the cached copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WritePolicy {
    /// Delete the cached copy; the next read repopulates it.
    #[default]
    Invalidate,
    /// Replace the cached copy with the new record.
    Overwrite,
}

impl FromStr for WritePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "invalidate" => Ok(WritePolicy::Invalidate),
            "overwrite" => Ok(WritePolicy::Overwrite),
            other => Err(format!("unknown write policy '{}'", other)),
        }
    }
}

/// Cache-aside configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    /// Redis URL; `None` selects the in-process memory tier.
    pub url: Option<String>,
    /// Master switch. When off every read bypasses the cache.
    pub enabled: bool,
    /// Prefix prepended to every cache key as `"{namespace}:"`.
    pub namespace: String,
    /// Lifetime assigned to an entry when it is populated.
    pub ttl: Duration,
    pub write_policy: WritePolicy,
    /// Upper bound for a single cache call.
    pub timeout: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            url: None,
            enabled: true,
            namespace: "mirrorgate".to_string(),
            ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            write_policy: WritePolicy::Invalidate,
            timeout: Duration::from_millis(250),
        }
    }
}

impl CacheSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&process_env)
    }

    pub fn from_lookup(env: &impl EnvLookup) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let ttl_secs = env_parse(env, "CACHE_TTL_SECONDS", DEFAULT_CACHE_TTL_SECS)?;
        if ttl_secs == 0 {
            return Err(ConfigError::invalid(
                "CACHE_TTL_SECONDS",
                "0",
                "must be greater than zero",
            ));
        }
        if ttl_secs > MAX_CACHE_TTL_SECS {
            return Err(ConfigError::invalid(
                "CACHE_TTL_SECONDS",
                ttl_secs.to_string(),
                format!("must be at most {}", MAX_CACHE_TTL_SECS),
            ));
        }

        let namespace = non_empty(env, "MIRRORGATE_CACHE_NAMESPACE").unwrap_or(defaults.namespace);
        let timeout_ms = call_timeout_ms(env, "MIRRORGATE_CACHE_TIMEOUT_MS", 250)?;

        Ok(Self {
            url: non_empty(env, "MIRRORGATE_CACHE_URL"),
            enabled: env_flag(env, "MIRRORGATE_CACHE_ENABLED", defaults.enabled)?,
            namespace,
            ttl: Duration::from_secs(ttl_secs),
            write_policy: env_parse(env, "MIRRORGATE_CACHE_WRITE_POLICY", defaults.write_policy)?,
            timeout: Duration::from_millis(timeout_ms),
        })
    }

    /// Set the entry TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the write policy.
    pub fn with_write_policy(mut self, policy: WritePolicy) -> Self {
        self.write_policy = policy;
        self
    }

    /// Enable or disable the cache.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the key namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }
}

/// Parse a per-call timeout in milliseconds, bounded to `1..=MAX_CALL_TIMEOUT_MS`.
fn call_timeout_ms(env: &impl EnvLookup, field: &str, default: u64) -> Result<u64, ConfigError> {
    let timeout_ms = env_parse(env, field, default)?;
    if timeout_ms == 0 || timeout_ms > MAX_CALL_TIMEOUT_MS {
        return Err(ConfigError::invalid(
            field,
            timeout_ms.to_string(),
            format!("must be between 1 and {}", MAX_CALL_TIMEOUT_MS),
        ));
    }
    Ok(timeout_ms)
}

// ============================================================================
// STORE SETTINGS
// ============================================================================

/// Persistent store implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackendKind {
    #[default]
    Lmdb,
    Postgres,
}

impl FromStr for StoreBackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lmdb" => Ok(StoreBackendKind::Lmdb),
            "postgres" | "postgresql" => Ok(StoreBackendKind::Postgres),
            other => Err(format!("unknown store backend '{}'", other)),
        }
    }
}

/// Document store configuration. Postgres connection details are read
/// separately by the API crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSettings {
    pub backend: StoreBackendKind,
    /// LMDB environment directory.
    pub path: PathBuf,
    pub map_size_mb: usize,
    /// Upper bound for a single store call.
    pub timeout: Duration,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackendKind::Lmdb,
            path: PathBuf::from(DEFAULT_STORE_PATH),
            map_size_mb: 1024,
            timeout: Duration::from_millis(2000),
        }
    }
}

impl StoreSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&process_env)
    }

    pub fn from_lookup(env: &impl EnvLookup) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let map_size_mb = env_parse(env, "MIRRORGATE_STORE_MAP_SIZE_MB", defaults.map_size_mb)?;
        if map_size_mb == 0 {
            return Err(ConfigError::invalid(
                "MIRRORGATE_STORE_MAP_SIZE_MB",
                "0",
                "must be greater than zero",
            ));
        }
        let timeout_ms = call_timeout_ms(env, "MIRRORGATE_STORE_TIMEOUT_MS", 2000)?;

        Ok(Self {
            backend: env_parse(env, "MIRRORGATE_STORE_BACKEND", defaults.backend)?,
            path: non_empty(env, "MIRRORGATE_STORE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.path),
            map_size_mb,
            timeout: Duration::from_millis(timeout_ms),
        })
    }
}

// ============================================================================
// TIMEZONE
// ============================================================================

/// Timezone used to render log timestamps (`TIMEZONE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeZoneSpec {
    #[default]
    Utc,
    /// The host's local zone.
    Local,
    /// A fixed offset such as `+08:00`.
    Fixed(FixedOffset),
}

impl TimeZoneSpec {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&process_env)
    }

    pub fn from_lookup(env: &impl EnvLookup) -> Result<Self, ConfigError> {
        env_parse(env, "TIMEZONE", TimeZoneSpec::Utc)
    }
}

impl FromStr for TimeZoneSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "utc" | "gmt" | "z" | "etc/utc" => return Ok(TimeZoneSpec::Utc),
            "local" => return Ok(TimeZoneSpec::Local),
            _ => {}
        }

        let offset = trimmed
            .strip_prefix("UTC")
            .or_else(|| trimmed.strip_prefix("GMT"))
            .unwrap_or(trimmed);
        parse_fixed_offset(offset)
            .map(TimeZoneSpec::Fixed)
            .ok_or_else(|| format!("expected UTC, local, or an offset like +08:00, got '{}'", s))
    }
}

/// Parse `+HH:MM`, `-HHMM` or `+HH`.
fn parse_fixed_offset(raw: &str) -> Option<FixedOffset> {
    let (sign, rest) = match raw.as_bytes().first()? {
        b'+' => (1, &raw[1..]),
        b'-' => (-1, &raw[1..]),
        _ => return None,
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let (hours, minutes) = match digits.len() {
        1 | 2 => (digits.parse::<i32>().ok()?, 0),
        4 => (digits[0..2].parse::<i32>().ok()?, digits[2..4].parse::<i32>().ok()?),
        _ => return None,
    };
    if hours > 14 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_cache_settings_defaults() {
        let settings = CacheSettings::from_lookup(&env(&[])).unwrap();
        assert_eq!(settings, CacheSettings::default());
        assert_eq!(settings.ttl, Duration::from_secs(3600));
        assert!(settings.url.is_none());
    }

    #[test]
    fn test_cache_settings_overrides() {
        let settings = CacheSettings::from_lookup(&env(&[
            ("CACHE_TTL_SECONDS", "86400"),
            ("MIRRORGATE_CACHE_URL", "redis://cache:6379/0"),
            ("MIRRORGATE_CACHE_ENABLED", "off"),
            ("MIRRORGATE_CACHE_WRITE_POLICY", "overwrite"),
            ("MIRRORGATE_CACHE_NAMESPACE", "mirror"),
        ]))
        .unwrap();
        assert_eq!(settings.ttl, Duration::from_secs(86400));
        assert_eq!(settings.url.as_deref(), Some("redis://cache:6379/0"));
        assert!(!settings.enabled);
        assert_eq!(settings.write_policy, WritePolicy::Overwrite);
        assert_eq!(settings.namespace, "mirror");
    }

    #[test]
    fn test_zero_ttl_is_rejected() {
        let err = CacheSettings::from_lookup(&env(&[("CACHE_TTL_SECONDS", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "CACHE_TTL_SECONDS"));
    }

    #[test]
    fn test_ttl_and_timeouts_are_bounded() {
        let huge = u64::MAX.to_string();
        let err = CacheSettings::from_lookup(&env(&[("CACHE_TTL_SECONDS", &huge)])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "CACHE_TTL_SECONDS"));

        let max = MAX_CACHE_TTL_SECS.to_string();
        let settings = CacheSettings::from_lookup(&env(&[("CACHE_TTL_SECONDS", &max)])).unwrap();
        assert_eq!(settings.ttl, Duration::from_secs(MAX_CACHE_TTL_SECS));

        let err = CacheSettings::from_lookup(&env(&[("MIRRORGATE_CACHE_TIMEOUT_MS", &huge)]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "MIRRORGATE_CACHE_TIMEOUT_MS"));
        assert!(CacheSettings::from_lookup(&env(&[("MIRRORGATE_CACHE_TIMEOUT_MS", "0")])).is_err());

        let err = StoreSettings::from_lookup(&env(&[("MIRRORGATE_STORE_TIMEOUT_MS", &huge)]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "MIRRORGATE_STORE_TIMEOUT_MS"));
    }

    #[test]
    fn test_garbage_ttl_is_rejected() {
        assert!(CacheSettings::from_lookup(&env(&[("CACHE_TTL_SECONDS", "soon")])).is_err());
    }

    #[test]
    fn test_bad_flag_is_rejected() {
        assert!(CacheSettings::from_lookup(&env(&[("MIRRORGATE_CACHE_ENABLED", "maybe")])).is_err());
    }

    #[test]
    fn test_store_settings() {
        let settings = StoreSettings::from_lookup(&env(&[
            ("MIRRORGATE_STORE_BACKEND", "postgres"),
            ("MIRRORGATE_STORE_TIMEOUT_MS", "500"),
        ]))
        .unwrap();
        assert_eq!(settings.backend, StoreBackendKind::Postgres);
        assert_eq!(settings.timeout, Duration::from_millis(500));
        assert!(StoreSettings::from_lookup(&env(&[("MIRRORGATE_STORE_BACKEND", "mongo")])).is_err());
    }

    #[test]
    fn test_timezone_parsing() {
        assert_eq!("UTC".parse::<TimeZoneSpec>(), Ok(TimeZoneSpec::Utc));
        assert_eq!("local".parse::<TimeZoneSpec>(), Ok(TimeZoneSpec::Local));
        assert_eq!(
            "+08:00".parse::<TimeZoneSpec>(),
            Ok(TimeZoneSpec::Fixed(FixedOffset::east_opt(8 * 3600).unwrap()))
        );
        assert_eq!(
            "UTC-0530".parse::<TimeZoneSpec>(),
            Ok(TimeZoneSpec::Fixed(FixedOffset::west_opt(5 * 3600 + 30 * 60).unwrap()))
        );
        assert!("Mars/Olympus".parse::<TimeZoneSpec>().is_err());
        assert!("+25:00".parse::<TimeZoneSpec>().is_err());
    }

    #[test]
    fn test_timezone_from_lookup_defaults_to_utc() {
        assert_eq!(TimeZoneSpec::from_lookup(&env(&[])), Ok(TimeZoneSpec::Utc));
    }
}
