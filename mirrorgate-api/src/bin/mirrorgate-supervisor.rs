//! Mirrorgate Supervisor Entry Point
//!
//! Provisions the metrics directory, runs the worker pool, and stops it on
//! SIGINT/SIGTERM.

use std::process::ExitCode;

use mirrorgate_api::supervisor::{HttpProbe, Supervisor, SupervisorConfig, SupervisorError};
use mirrorgate_api::telemetry::{init_tracer, TelemetryConfig};
use mirrorgate_core::{TimeZoneSpec, WorkerExit};

#[tokio::main]
async fn main() -> ExitCode {
    let config = match SupervisorConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            let _ = init_tracer(&TelemetryConfig::new("mirrorgate-supervisor", TimeZoneSpec::Utc));
            tracing::error!(error = %e, "Invalid supervisor configuration");
            return WorkerExit::ConfigInvalid.into();
        }
    };

    if let Err(e) = init_tracer(&TelemetryConfig::new("mirrorgate-supervisor", config.timezone)) {
        eprintln!("{}", e);
        return WorkerExit::ConfigInvalid.into();
    }

    let probe = match HttpProbe::new(config.probe_host.clone(), config.probe_timeout) {
        Ok(probe) => probe,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build the health probe client");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(
        workers = config.workers,
        base_port = config.base_port,
        worker_bin = %config.worker_bin.display(),
        metrics_dir = %config.metrics_dir.display(),
        "Starting supervisor"
    );

    match Supervisor::new(config, probe).run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e @ SupervisorError::MetricsDir { .. }) => {
            tracing::error!(error = %e, "Supervisor failed");
            WorkerExit::MetricsDirUnavailable.into()
        }
        Err(e @ SupervisorError::Config(_)) => {
            tracing::error!(error = %e, "Supervisor failed");
            WorkerExit::ConfigInvalid.into()
        }
        Err(e) => {
            tracing::error!(error = %e, "Supervisor failed");
            ExitCode::FAILURE
        }
    }
}
