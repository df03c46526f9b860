//! Mirrorgate Worker Entry Point
//!
//! Reads its configuration from the environment, serves until signalled or
//! until its metrics directory disappears, and exits with a code the
//! supervisor can interpret.

use std::process::ExitCode;

use mirrorgate_api::telemetry::{init_tracer, TelemetryConfig};
use mirrorgate_api::{worker, WorkerConfig};
use mirrorgate_core::{TimeZoneSpec, WorkerExit};

#[tokio::main]
async fn main() -> ExitCode {
    let config = match WorkerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            // TIMEZONE itself may be the bad value, so log in UTC.
            let _ = init_tracer(&TelemetryConfig::new("mirrorgate-worker", TimeZoneSpec::Utc));
            tracing::error!(error = %e, "Invalid worker configuration");
            return WorkerExit::ConfigInvalid.into();
        }
    };

    if let Err(e) = init_tracer(&TelemetryConfig::new("mirrorgate-worker", config.timezone)) {
        eprintln!("{}", e);
        return WorkerExit::ConfigInvalid.into();
    }

    worker::run(config).await.into()
}
