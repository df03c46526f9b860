//! Worker pool supervision.
//!
//! The supervisor owns the metrics directory and the worker processes. It is
//! the only component that ever deletes shards, and it does so only while
//! provisioning, before any worker has been spawned.

use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use mirrorgate_core::{ConfigError, WorkerExit};
use mirrorgate_storage::{CacheTier, NamespacedKey, RedisCacheTier};
use tokio::process::{Child, Command};
use tokio::time::Instant;

use super::config::SupervisorConfig;
use super::probe::HealthProbe;
use super::state::{InvalidTransition, StateMachine, SupervisorState};

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("Failed to reset metrics directory {path}: {source}")]
    MetricsDir { path: PathBuf, source: io::Error },

    #[error("Failed to spawn worker {index} ({bin}): {source}")]
    Spawn {
        index: u32,
        bin: PathBuf,
        source: io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

// ============================================================================
// WORKER SLOTS
// ============================================================================

/// One position in the pool. The process in it changes across respawns.
#[derive(Debug)]
struct WorkerSlot {
    index: u32,
    port: u16,
    child: Option<Child>,
    restarts: u32,
    /// When the current process was spawned.
    spawned_at: Instant,
    /// Whether the current process has passed a probe yet.
    seen_alive: bool,
    /// Consecutive failed probes of the current process.
    probe_failures: u32,
}

impl WorkerSlot {
    fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// Record a failed probe. Returns whether the process should be replaced.
    ///
    /// A new process is not counted against until it has either passed a
    /// probe or outlived the startup timeout.
    fn probe_failed(&mut self, startup_timeout: Duration, max_failures: u32) -> bool {
        if !self.seen_alive && self.spawned_at.elapsed() < startup_timeout {
            return false;
        }
        self.probe_failures += 1;
        self.probe_failures >= max_failures
    }

    fn probe_passed(&mut self) {
        self.seen_alive = true;
        self.probe_failures = 0;
    }
}

/// Point-in-time view of one slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerStatus {
    pub index: u32,
    pub port: u16,
    pub pid: Option<u32>,
    pub restarts: u32,
}

// ============================================================================
// SUPERVISOR
// ============================================================================

/// Spawns, monitors, respawns and stops the worker pool.
pub struct Supervisor<P> {
    config: SupervisorConfig,
    probe: P,
    machine: StateMachine,
    slots: Vec<WorkerSlot>,
}

impl<P: HealthProbe> Supervisor<P> {
    pub fn new(config: SupervisorConfig, probe: P) -> Self {
        Self {
            config,
            probe,
            machine: StateMachine::new(),
            slots: Vec::new(),
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.machine.state()
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn workers(&self) -> Vec<WorkerStatus> {
        self.slots
            .iter()
            .map(|slot| WorkerStatus {
                index: slot.index,
                port: slot.port,
                pid: slot.pid(),
                restarts: slot.restarts,
            })
            .collect()
    }

    /// Provision and then monitor until SIGINT/SIGTERM, then shut down.
    pub async fn run(mut self) -> Result<(), SupervisorError> {
        self.provision().await?;

        let mut interval = tokio::time::interval(self.config.health_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let shutdown = crate::worker::shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = interval.tick() => {
                    self.tick().await?;
                }
            }
        }

        self.shutdown().await
    }

    /// Reset the metrics directory, optionally flush the cache, spawn every
    /// worker, and wait for them to come up.
    pub async fn provision(&mut self) -> Result<(), SupervisorError> {
        self.machine.transition(SupervisorState::Provisioning)?;

        if let Err(e) = reset_metrics_dir(&self.config.metrics_dir) {
            self.abort_provisioning().await?;
            return Err(e);
        }
        tracing::info!(dir = %self.config.metrics_dir.display(), "Metrics directory reset");

        if self.config.flush_cache_on_start {
            flush_cache(&self.config).await;
        }

        self.slots = (0..self.config.workers)
            .map(|index| WorkerSlot {
                index,
                port: self.config.port_for(index),
                child: None,
                restarts: 0,
                spawned_at: Instant::now(),
                seen_alive: false,
                probe_failures: 0,
            })
            .collect();

        for i in 0..self.slots.len() {
            if let Err(e) = self.spawn(i) {
                self.abort_provisioning().await?;
                return Err(e);
            }
        }

        let healthy = self.wait_until_alive(self.config.startup_timeout).await;
        let next = if healthy {
            self.slots.iter_mut().for_each(WorkerSlot::probe_passed);
            SupervisorState::Running
        } else {
            tracing::warn!(
                timeout_secs = self.config.startup_timeout.as_secs(),
                "Not every worker passed its liveness probe in time"
            );
            SupervisorState::Degraded
        };
        self.machine.transition(next)?;
        Ok(())
    }

    /// One monitor pass: reap exited workers and respawn them, probe the
    /// rest, and move between Running and Degraded accordingly.
    pub async fn tick(&mut self) -> Result<SupervisorState, SupervisorError> {
        if !matches!(
            self.state(),
            SupervisorState::Running | SupervisorState::Degraded
        ) {
            return Ok(self.state());
        }
        ensure_metrics_dir(&self.config.metrics_dir);

        let mut all_healthy = true;
        for i in 0..self.slots.len() {
            if let Some(status) = self.reap(i) {
                all_healthy = false;
                log_exit(&self.slots[i], status);
                self.slots[i].restarts += 1;
                if let Err(e) = self.spawn(i) {
                    tracing::error!(error = %e, "Respawn failed");
                }
                continue;
            }

            if self.slots[i].child.is_none() {
                all_healthy = false;
                if let Err(e) = self.spawn(i) {
                    tracing::error!(error = %e, "Respawn failed");
                }
                continue;
            }

            if self.probe.is_alive(self.slots[i].port).await {
                self.slots[i].probe_passed();
                continue;
            }
            all_healthy = false;

            let slot = &mut self.slots[i];
            let replace =
                slot.probe_failed(self.config.startup_timeout, self.config.max_probe_failures);
            tracing::warn!(
                worker = slot.index,
                port = slot.port,
                pid = ?slot.pid(),
                failures = slot.probe_failures,
                "Worker failed its liveness probe"
            );
            if replace {
                self.replace_unresponsive(i).await;
            }
        }

        let state = self.machine.state();
        match (state, all_healthy) {
            (SupervisorState::Running, false) => {
                self.machine.transition(SupervisorState::Degraded)?
            }
            (SupervisorState::Degraded, true) => {
                self.machine.transition(SupervisorState::Running)?
            }
            _ => {}
        }
        Ok(self.machine.state())
    }

    /// SIGTERM every worker, wait out the grace period, kill what is left.
    pub async fn shutdown(&mut self) -> Result<(), SupervisorError> {
        self.machine.transition(SupervisorState::ShuttingDown)?;
        self.stop_workers().await;
        self.machine.transition(SupervisorState::Empty)?;
        tracing::info!("Supervisor stopped");
        Ok(())
    }

    async fn abort_provisioning(&mut self) -> Result<(), SupervisorError> {
        self.machine.transition(SupervisorState::ShuttingDown)?;
        self.stop_workers().await;
        self.machine.transition(SupervisorState::Empty)?;
        Ok(())
    }

    /// Kill a worker that is running but no longer answers, then respawn it.
    async fn replace_unresponsive(&mut self, i: usize) {
        let slot = &mut self.slots[i];
        let Some(mut child) = slot.child.take() else {
            return;
        };
        tracing::error!(worker = slot.index, pid = ?child.id(), "Worker unresponsive, killing");
        if let Err(e) = child.kill().await {
            tracing::warn!(worker = slot.index, error = %e, "Failed to kill worker");
        }
        slot.restarts += 1;
        if let Err(e) = self.spawn(i) {
            tracing::error!(error = %e, "Respawn failed");
        }
    }

    fn spawn(&mut self, i: usize) -> Result<(), SupervisorError> {
        let slot = &mut self.slots[i];
        let child = Command::new(&self.config.worker_bin)
            .envs(self.config.worker_env.iter().map(|(k, v)| (k, v)))
            .env("MIRRORGATE_WORKERS", self.config.workers.to_string())
            .env("PORT", slot.port.to_string())
            .env("WORKER_INDEX", slot.index.to_string())
            .env("METRICS_DIR", &self.config.metrics_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SupervisorError::Spawn {
                index: slot.index,
                bin: self.config.worker_bin.clone(),
                source,
            })?;

        tracing::info!(worker = slot.index, port = slot.port, pid = ?child.id(), "Worker spawned");
        slot.child = Some(child);
        slot.spawned_at = Instant::now();
        slot.seen_alive = false;
        slot.probe_failures = 0;
        Ok(())
    }

    /// Exit status of slot `i` if its process has ended.
    fn reap(&mut self, i: usize) -> Option<ExitStatus> {
        let slot = &mut self.slots[i];
        let child = slot.child.as_mut()?;
        match child.try_wait() {
            Ok(Some(status)) => {
                slot.child = None;
                Some(status)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(worker = slot.index, error = %e, "Failed to poll worker");
                None
            }
        }
    }

    async fn wait_until_alive(&self, timeout: Duration) -> bool {
        let deadline = deadline_after(timeout);
        loop {
            let mut alive = true;
            for slot in &self.slots {
                if slot.child.is_none() || !self.probe.is_alive(slot.port).await {
                    alive = false;
                    break;
                }
            }
            if alive {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    async fn stop_workers(&mut self) {
        for slot in &mut self.slots {
            if let Some(child) = slot.child.as_mut() {
                terminate(child);
            }
        }

        let deadline = deadline_after(self.config.shutdown_grace);
        for slot in &mut self.slots {
            let Some(mut child) = slot.child.take() else {
                continue;
            };
            match tokio::time::timeout_at(deadline, child.wait()).await {
                Ok(Ok(status)) => log_exit(slot, status),
                Ok(Err(e)) => tracing::warn!(worker = slot.index, error = %e, "Failed to wait for worker"),
                Err(_) => {
                    tracing::warn!(worker = slot.index, "Grace period over, killing worker");
                    if let Err(e) = child.kill().await {
                        tracing::warn!(worker = slot.index, error = %e, "Failed to kill worker");
                    }
                }
            }
        }
    }
}

// ============================================================================
// HELPERS
// ============================================================================

/// `Instant` `after` from now, clamped to a year for unrepresentable waits.
fn deadline_after(after: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(after)
        .unwrap_or_else(|| now + Duration::from_secs(365 * 24 * 3600))
}

/// Remove and recreate the metrics directory, dropping every shard in it.
fn reset_metrics_dir(dir: &Path) -> Result<(), SupervisorError> {
    let wrap = |source| SupervisorError::MetricsDir {
        path: dir.to_path_buf(),
        source,
    };
    match std::fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(wrap(e)),
    }
    std::fs::create_dir_all(dir).map_err(wrap)
}

/// Recreate a vanished metrics directory without touching an existing one.
///
/// Workers still holding the old directory notice on their next flush and
/// exit; their replacements land in the new one.
fn ensure_metrics_dir(dir: &Path) {
    if dir.is_dir() {
        return;
    }
    tracing::warn!(dir = %dir.display(), "Metrics directory vanished, recreating");
    if let Err(e) = std::fs::create_dir_all(dir) {
        tracing::error!(dir = %dir.display(), error = %e, "Failed to recreate metrics directory");
    }
}

async fn flush_cache(config: &SupervisorConfig) {
    let Some(url) = config.cache.url.as_deref() else {
        tracing::debug!("No shared cache tier configured, nothing to flush");
        return;
    };
    let prefix = NamespacedKey::prefix(&config.cache.namespace);
    let flush = async {
        let tier = RedisCacheTier::connect(url).await?;
        Ok::<_, mirrorgate_core::MirrorError>(tier.flush_prefix(&prefix).await?)
    };
    match tokio::time::timeout(config.cache.timeout.saturating_mul(40), flush).await {
        Ok(Ok(removed)) => tracing::info!(removed, prefix = %prefix, "Cache namespace flushed"),
        Ok(Err(e)) => tracing::warn!(error = %e, "Cache flush failed"),
        Err(_) => tracing::warn!("Cache flush timed out"),
    }
}

fn log_exit(slot: &WorkerSlot, status: ExitStatus) {
    let code = status.code();
    match code.and_then(WorkerExit::from_code) {
        Some(WorkerExit::Graceful) => {
            tracing::info!(worker = slot.index, "Worker exited cleanly");
        }
        Some(exit) => {
            tracing::warn!(worker = slot.index, exit = %exit, "Worker exited");
        }
        None => {
            tracing::warn!(worker = slot.index, status = %status, "Worker exited abnormally");
        }
    }
}

#[cfg(unix)]
fn terminate(child: &mut Child) {
    let Some(pid) = child.id() else {
        return;
    };
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: kill(2) with a pid we spawned and have not yet reaped.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc != 0 {
        tracing::warn!(pid, error = %io::Error::last_os_error(), "Failed to send SIGTERM");
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        tracing::warn!(error = %e, "Failed to stop worker");
    }
}
