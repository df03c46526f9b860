//! Worker Pool Supervisor
//!
//! Spawns one `mirrorgate-worker` process per pool slot, probes and respawns
//! them, and owns the shared metrics directory. The directory is reset only
//! while provisioning, so shards of crashed workers stay in the merged
//! exposition until the next full restart.

pub mod config;
pub mod pool;
pub mod probe;
pub mod state;

pub use config::{SupervisorConfig, WORKER_BIN_NAME};
pub use pool::{Supervisor, SupervisorError, WorkerStatus};
pub use probe::{HealthProbe, HttpProbe};
pub use state::{InvalidTransition, StateMachine, SupervisorState};
