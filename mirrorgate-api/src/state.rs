//! Shared application state for the worker router.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::FromRef;
use mirrorgate_core::WorkerExit;
use mirrorgate_metrics::{Aggregator, ShardWriter, WorkerMetrics};
use mirrorgate_storage::WorkerAccessor;
use tokio::sync::watch;

use crate::config::ApiConfig;

// ============================================================================
// EXIT SIGNAL
// ============================================================================

/// One-shot request for the worker to stop serving and exit with a code.
///
/// Handlers trigger it when they hit a process-fatal condition; the server's
/// graceful-shutdown future waits on it. Only the first trigger is kept.
#[derive(Clone)]
pub struct ExitSignal {
    tx: Arc<watch::Sender<Option<WorkerExit>>>,
}

impl ExitSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Request an exit. Later requests are ignored.
    pub fn trigger(&self, exit: WorkerExit) {
        let first = self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(exit);
            true
        });
        if first {
            tracing::warn!(exit = %exit, "Worker exit requested");
        }
    }

    /// The requested exit, if any.
    pub fn current(&self) -> Option<WorkerExit> {
        *self.tx.borrow()
    }

    /// Wait until an exit is requested.
    pub async fn wait(&self) -> WorkerExit {
        let mut rx = self.tx.subscribe();
        loop {
            let current = *rx.borrow_and_update();
            if let Some(exit) = current {
                return exit;
            }
            if rx.changed().await.is_err() {
                return WorkerExit::Graceful;
            }
        }
    }
}

impl Default for ExitSignal {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// APPLICATION STATE
// ============================================================================

/// Application-wide state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    /// Cache-aside accessor over this worker's cache tier and store.
    pub accessor: WorkerAccessor,
    /// This process's metric instruments.
    pub metrics: WorkerMetrics,
    /// Exclusive shard file the instruments are flushed to.
    pub shard: Arc<ShardWriter>,
    /// Reader over every shard in the metrics directory.
    pub aggregator: Aggregator,
    pub exit: ExitSignal,
    pub config: Arc<ApiConfig>,
    pub pid: u32,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        accessor: WorkerAccessor,
        metrics: WorkerMetrics,
        shard: ShardWriter,
        config: ApiConfig,
    ) -> Self {
        let aggregator = Aggregator::new(shard.dir());
        Self {
            accessor,
            metrics,
            shard: Arc::new(shard),
            aggregator,
            exit: ExitSignal::new(),
            config: Arc::new(config),
            pid: std::process::id(),
            start_time: Instant::now(),
        }
    }
}

impl FromRef<AppState> for WorkerAccessor {
    fn from_ref(state: &AppState) -> Self {
        state.accessor.clone()
    }
}

impl FromRef<AppState> for ExitSignal {
    fn from_ref(state: &AppState) -> Self {
        state.exit.clone()
    }
}
