//! Supervisor configuration.

use std::path::PathBuf;
use std::time::Duration;

use mirrorgate_core::{
    env_flag, env_parse, process_env, CacheSettings, ConfigError, EnvLookup, TimeZoneSpec,
    DEFAULT_METRICS_DIR,
};

/// File name of the worker executable, looked up next to the supervisor.
pub const WORKER_BIN_NAME: &str = "mirrorgate-worker";

/// Everything the supervisor reads from its environment.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Pool size.
    pub workers: u32,
    /// Worker `i` listens on `base_port + i`.
    pub base_port: u16,
    /// Host the liveness probes connect to.
    pub probe_host: String,
    /// Worker executable.
    pub worker_bin: PathBuf,
    /// Shared shard directory, reset during provisioning.
    pub metrics_dir: PathBuf,
    /// Period of the reap/probe/respawn loop.
    pub health_interval: Duration,
    /// Upper bound for one liveness probe.
    pub probe_timeout: Duration,
    /// How long provisioning waits for every worker to pass its probe.
    pub startup_timeout: Duration,
    /// How long shutdown waits after SIGTERM before killing.
    pub shutdown_grace: Duration,
    /// Consecutive failed probes after which a running worker is replaced.
    pub max_probe_failures: u32,
    /// Flush the cache namespace during provisioning.
    pub flush_cache_on_start: bool,
    pub cache: CacheSettings,
    pub timezone: TimeZoneSpec,
    /// Extra variables set on every worker on top of the inherited environment.
    pub worker_env: Vec<(String, String)>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            base_port: 8000,
            probe_host: "127.0.0.1".to_string(),
            worker_bin: default_worker_bin(),
            metrics_dir: PathBuf::from(DEFAULT_METRICS_DIR),
            health_interval: Duration::from_millis(2000),
            probe_timeout: Duration::from_millis(1000),
            startup_timeout: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(10),
            max_probe_failures: 3,
            flush_cache_on_start: false,
            cache: CacheSettings::default(),
            timezone: TimeZoneSpec::Utc,
            worker_env: Vec::new(),
        }
    }
}

impl SupervisorConfig {
    /// Create SupervisorConfig from environment variables.
    ///
    /// Environment variables:
    /// - `MIRRORGATE_WORKERS`: pool size (default: 4)
    /// - `PORT`: base port (default: 8000)
    /// - `MIRRORGATE_PROBE_HOST`: probe target host (default: 127.0.0.1)
    /// - `MIRRORGATE_WORKER_BIN`: worker executable (default: sibling `mirrorgate-worker`)
    /// - `METRICS_DIR`: shard directory (default: /tmp/mirrorgate-metrics)
    /// - `MIRRORGATE_HEALTH_INTERVAL_MS`: monitor period (default: 2000)
    /// - `MIRRORGATE_PROBE_TIMEOUT_MS`: probe timeout (default: 1000)
    /// - `MIRRORGATE_STARTUP_TIMEOUT_SECS`: provisioning wait (default: 30)
    /// - `MIRRORGATE_SHUTDOWN_GRACE_SECS`: shutdown grace (default: 10)
    /// - `MIRRORGATE_MAX_PROBE_FAILURES`: failed probes before a worker is replaced (default: 3)
    /// - `MIRRORGATE_FLUSH_CACHE_ON_START`: flush the cache namespace (default: false)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&process_env)
    }

    pub fn from_lookup(env: &impl EnvLookup) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let workers: u32 = env_parse(env, "MIRRORGATE_WORKERS", defaults.workers)?;
        if workers == 0 {
            return Err(ConfigError::invalid(
                "MIRRORGATE_WORKERS",
                "0",
                "must be greater than zero",
            ));
        }

        let base_port: u16 = env_parse(env, "PORT", defaults.base_port)?;
        if u32::from(base_port) + workers - 1 > u32::from(u16::MAX) {
            return Err(ConfigError::invalid(
                "PORT",
                base_port.to_string(),
                format!("{} workers do not fit below port 65535", workers),
            ));
        }

        let max_probe_failures: u32 =
            env_parse(env, "MIRRORGATE_MAX_PROBE_FAILURES", defaults.max_probe_failures)?;
        if max_probe_failures == 0 {
            return Err(ConfigError::invalid(
                "MIRRORGATE_MAX_PROBE_FAILURES",
                "0",
                "must be greater than zero",
            ));
        }

        let interval_ms: u64 = env_parse(env, "MIRRORGATE_HEALTH_INTERVAL_MS", 2000)?;
        let probe_ms: u64 = env_parse(env, "MIRRORGATE_PROBE_TIMEOUT_MS", 1000)?;

        Ok(Self {
            workers,
            base_port,
            probe_host: env_parse(env, "MIRRORGATE_PROBE_HOST", defaults.probe_host)?,
            worker_bin: env_parse(env, "MIRRORGATE_WORKER_BIN", defaults.worker_bin)?,
            metrics_dir: env_parse(env, "METRICS_DIR", defaults.metrics_dir)?,
            health_interval: Duration::from_millis(interval_ms.max(1)),
            probe_timeout: Duration::from_millis(probe_ms.max(1)),
            startup_timeout: Duration::from_secs(env_parse(
                env,
                "MIRRORGATE_STARTUP_TIMEOUT_SECS",
                30u64,
            )?),
            shutdown_grace: Duration::from_secs(env_parse(
                env,
                "MIRRORGATE_SHUTDOWN_GRACE_SECS",
                10u64,
            )?),
            max_probe_failures,
            flush_cache_on_start: env_flag(
                env,
                "MIRRORGATE_FLUSH_CACHE_ON_START",
                defaults.flush_cache_on_start,
            )?,
            cache: CacheSettings::from_lookup(env)?,
            timezone: TimeZoneSpec::from_lookup(env)?,
            worker_env: Vec::new(),
        })
    }

    /// Port assigned to worker `index`.
    pub fn port_for(&self, index: u32) -> u16 {
        // from_lookup guarantees every index below `workers` fits.
        u16::try_from(u32::from(self.base_port) + index).unwrap_or(u16::MAX)
    }
}

fn default_worker_bin() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(WORKER_BIN_NAME)))
        .unwrap_or_else(|| PathBuf::from(WORKER_BIN_NAME))
}
