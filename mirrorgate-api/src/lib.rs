//! Mirrorgate API - worker HTTP surface and process supervision
//!
//! Each worker process serves documents through the cache-aside accessor,
//! records every instrumented request into its own metrics shard, and answers
//! scrapes with the exposition merged across all shards. The supervisor runs
//! the pool of workers and owns the shared metrics directory.

pub mod config;
pub mod db;
pub mod error;
#[cfg(feature = "openapi")]
pub mod openapi;
pub mod routes;
pub mod state;
pub mod supervisor;
pub mod telemetry;
pub mod worker;

// Re-export commonly used types
pub use config::{ApiConfig, WorkerConfig};
pub use db::{DbConfig, PgDocumentStore};
pub use error::{ApiError, ApiResult, ErrorCode};
#[cfg(feature = "openapi")]
pub use openapi::ApiDoc;
pub use routes::create_router;
pub use state::{AppState, ExitSignal};
pub use supervisor::{HttpProbe, Supervisor, SupervisorConfig, SupervisorError, SupervisorState};
