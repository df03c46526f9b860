#![cfg(unix)]
//! Supervisor Tests Against Real Worker Processes
//!
//! **Property 5: Supervisor Lifecycle**
//!
//! For a pool of workers the supervisor SHALL:
//! - Reset the metrics directory and reach Running once every worker is live
//! - Move to Degraded when a worker dies, respawn it, and return to Running
//! - Keep the dead worker's shard so its counts stay in the merged exposition
//! - Kill and respawn a worker that is running but keeps failing its probe
//! - Stop every worker and end in Empty on shutdown

use std::path::PathBuf;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mirrorgate_api::supervisor::{
    HealthProbe, HttpProbe, Supervisor, SupervisorConfig, SupervisorState,
};
use reqwest::StatusCode;
use tempfile::TempDir;

#[path = "support/workers.rs"]
mod test_workers;
use test_workers::{free_port_range, shard_files, sum_samples, url, worker_env, WORKER_BIN};

const WORKERS: u16 = 2;

fn supervisor_config(temp: &TempDir, base_port: u16) -> SupervisorConfig {
    SupervisorConfig {
        workers: u32::from(WORKERS),
        base_port,
        worker_bin: PathBuf::from(WORKER_BIN),
        metrics_dir: temp.path().join("metrics"),
        health_interval: Duration::from_millis(200),
        probe_timeout: Duration::from_millis(500),
        startup_timeout: Duration::from_secs(30),
        shutdown_grace: Duration::from_secs(5),
        worker_env: worker_env(&temp.path().join("store")),
        ..SupervisorConfig::default()
    }
}

/// HTTP probe that reports one chosen port as dead while its process keeps running.
#[derive(Clone)]
struct MutedProbe {
    inner: HttpProbe,
    muted: Arc<AtomicU16>,
}

#[async_trait]
impl HealthProbe for MutedProbe {
    async fn is_alive(&self, port: u16) -> bool {
        port != self.muted.load(Ordering::SeqCst) && self.inner.is_alive(port).await
    }
}

async fn tick_until<P: HealthProbe>(
    supervisor: &mut Supervisor<P>,
    wanted: SupervisorState,
) -> SupervisorState {
    let mut state = supervisor.state();
    for _ in 0..150 {
        state = supervisor.tick().await.unwrap();
        if state == wanted {
            break;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    state
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_supervisor_lifecycle() {
    let temp = TempDir::new().unwrap();
    let base = free_port_range(WORKERS);
    let config = supervisor_config(&temp, base);

    std::fs::create_dir_all(&config.metrics_dir).unwrap();
    let orphan = config.metrics_dir.join("shard-999999-orphan.json");
    std::fs::write(&orphan, b"{}").unwrap();

    let probe = HttpProbe::new("127.0.0.1", config.probe_timeout).unwrap();
    let metrics_dir = config.metrics_dir.clone();
    let mut supervisor = Supervisor::new(config, probe);

    supervisor.provision().await.unwrap();
    assert_eq!(supervisor.state(), SupervisorState::Running);
    assert!(!orphan.exists(), "provisioning drops shards from earlier runs");
    assert_eq!(shard_files(&metrics_dir).len(), usize::from(WORKERS));

    let client = reqwest::Client::new();
    let victim = supervisor.workers()[1].clone();
    let stored = client
        .put(url(victim.port, "/documents/before-crash"))
        .body("x")
        .send()
        .await
        .unwrap();
    assert_eq!(stored.status(), StatusCode::OK);

    let pid = libc::pid_t::try_from(victim.pid.unwrap()).unwrap();
    // SAFETY: signalling a child this test's supervisor spawned.
    assert_eq!(unsafe { libc::kill(pid, libc::SIGKILL) }, 0);
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(supervisor.tick().await.unwrap(), SupervisorState::Degraded);
    let respawned = supervisor.workers()[1].clone();
    assert_eq!(respawned.restarts, 1);
    assert_ne!(respawned.pid, victim.pid);

    assert_eq!(
        tick_until(&mut supervisor, SupervisorState::Running).await,
        SupervisorState::Running
    );

    // Dead worker's shard plus one per live worker.
    assert_eq!(shard_files(&metrics_dir).len(), usize::from(WORKERS) + 1);
    let text = client
        .get(url(base, "/metrics"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(
        sum_samples(&text, "requests_total", "path=\"/documents/:key\""),
        1.0
    );

    supervisor.shutdown().await.unwrap();
    assert_eq!(supervisor.state(), SupervisorState::Empty);
    assert!(supervisor.workers().iter().all(|w| w.pid.is_none()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unreachable_workers_start_degraded() {
    let temp = TempDir::new().unwrap();
    let base = free_port_range(1);
    let mut config = supervisor_config(&temp, base);
    config.workers = 1;
    config.startup_timeout = Duration::from_secs(1);

    // Workers bind fine but the probe targets an address nothing answers on.
    let probe = HttpProbe::new("192.0.2.1", Duration::from_millis(200)).unwrap();
    let mut supervisor = Supervisor::new(config, probe);

    supervisor.provision().await.unwrap();
    assert_eq!(supervisor.state(), SupervisorState::Degraded);

    supervisor.shutdown().await.unwrap();
    assert_eq!(supervisor.state(), SupervisorState::Empty);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_worker_failing_probes_is_replaced() {
    let temp = TempDir::new().unwrap();
    let base = free_port_range(WORKERS);
    let mut config = supervisor_config(&temp, base);
    config.max_probe_failures = 2;

    let muted = Arc::new(AtomicU16::new(0));
    let probe = MutedProbe {
        inner: HttpProbe::new("127.0.0.1", config.probe_timeout).unwrap(),
        muted: Arc::clone(&muted),
    };
    let mut supervisor = Supervisor::new(config, probe);

    supervisor.provision().await.unwrap();
    assert_eq!(supervisor.state(), SupervisorState::Running);
    let hung = supervisor.workers()[1].clone();

    muted.store(hung.port, Ordering::SeqCst);
    assert_eq!(supervisor.tick().await.unwrap(), SupervisorState::Degraded);
    assert_eq!(supervisor.workers()[1].pid, hung.pid);

    assert_eq!(supervisor.tick().await.unwrap(), SupervisorState::Degraded);
    let replaced = supervisor.workers()[1].clone();
    assert_eq!(replaced.restarts, 1);
    assert_ne!(replaced.pid, hung.pid);

    muted.store(0, Ordering::SeqCst);
    assert_eq!(
        tick_until(&mut supervisor, SupervisorState::Running).await,
        SupervisorState::Running
    );

    supervisor.shutdown().await.unwrap();
    assert_eq!(supervisor.state(), SupervisorState::Empty);
}
