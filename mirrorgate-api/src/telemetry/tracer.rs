//! Tracing Subscriber Initialization
//!
//! JSON log lines on stdout, filtered by `RUST_LOG`, with timestamps rendered
//! in the zone named by `TIMEZONE`.

use std::fmt;

use chrono::{Local, Utc};
use mirrorgate_core::TimeZoneSpec;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{ApiError, ApiResult};

const DEFAULT_FILTER: &str = "mirrorgate=info,tower_http=info,info";

/// Telemetry configuration.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to the startup log line
    pub service_name: String,
    /// Service version
    pub service_version: String,
    /// Zone for log timestamps
    pub timezone: TimeZoneSpec,
}

impl TelemetryConfig {
    pub fn new(service_name: impl Into<String>, timezone: TimeZoneSpec) -> Self {
        Self {
            service_name: service_name.into(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            timezone,
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self::new("mirrorgate", TimeZoneSpec::Utc)
    }
}

/// RFC 3339 timestamps with millisecond precision in a configured zone.
#[derive(Debug, Clone, Copy)]
pub struct ZonedTimer {
    zone: TimeZoneSpec,
}

impl ZonedTimer {
    pub fn new(zone: TimeZoneSpec) -> Self {
        Self { zone }
    }

    fn render(&self) -> String {
        const FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f%:z";
        let now = Utc::now();
        match self.zone {
            TimeZoneSpec::Utc => now.format(FORMAT).to_string(),
            TimeZoneSpec::Local => now.with_timezone(&Local).format(FORMAT).to_string(),
            TimeZoneSpec::Fixed(offset) => now.with_timezone(&offset).format(FORMAT).to_string(),
        }
    }
}

impl FormatTime for ZonedTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        write!(w, "{}", self.render())
    }
}

/// Initialize the global tracing subscriber.
///
/// Call once at process startup. A second call fails because the global
/// subscriber is already set.
pub fn init_tracer(config: &TelemetryConfig) -> ApiResult<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_timer(ZonedTimer::new(config.timezone)),
        )
        .try_init()
        .map_err(|e| ApiError::internal_error(format!("Failed to init subscriber: {}", e)))?;

    tracing::info!(
        service_name = config.service_name,
        service_version = config.service_version,
        timezone = ?config.timezone,
        "Telemetry initialized"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, FixedOffset};

    #[test]
    fn test_fixed_offset_timestamps_carry_the_offset() {
        let offset = FixedOffset::east_opt(8 * 3600).unwrap();
        let rendered = ZonedTimer::new(TimeZoneSpec::Fixed(offset)).render();
        assert!(rendered.ends_with("+08:00"), "got {}", rendered);
        assert!(DateTime::parse_from_rfc3339(&rendered).is_ok());
    }

    #[test]
    fn test_utc_timestamps() {
        let rendered = ZonedTimer::new(TimeZoneSpec::Utc).render();
        assert!(rendered.ends_with("+00:00"), "got {}", rendered);
    }

    #[test]
    fn test_telemetry_config_default() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "mirrorgate");
        assert_eq!(config.timezone, TimeZoneSpec::Utc);
    }
}
