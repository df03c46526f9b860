#![allow(dead_code)]

use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use mirrorgate_metrics::is_shard_file_name;
use tokio::process::{Child, Command};

pub const WORKER_BIN: &str = env!("CARGO_BIN_EXE_mirrorgate-worker");

/// Base of `count` consecutive ports that were free a moment ago.
pub fn free_port_range(count: u16) -> u16 {
    for _ in 0..200 {
        let base = TcpListener::bind("127.0.0.1:0")
            .and_then(|l| l.local_addr())
            .expect("bind ephemeral port")
            .port();
        let Some(end) = base.checked_add(count) else {
            continue;
        };
        if (base..end).all(|port| TcpListener::bind(("127.0.0.1", port)).is_ok()) {
            return base;
        }
    }
    panic!("no free range of {} ports", count);
}

/// Variables every test worker needs besides PORT, WORKER_INDEX and METRICS_DIR.
pub fn worker_env(store: &Path) -> Vec<(String, String)> {
    vec![
        ("MIRRORGATE_BIND".to_string(), "127.0.0.1".to_string()),
        (
            "MIRRORGATE_STORE_PATH".to_string(),
            store.display().to_string(),
        ),
        ("MIRRORGATE_STORE_MAP_SIZE_MB".to_string(), "64".to_string()),
        ("CACHE_TTL_SECONDS".to_string(), "60".to_string()),
        ("RUST_LOG".to_string(), "warn".to_string()),
    ]
}

pub fn url(port: u16, path: &str) -> String {
    format!("http://127.0.0.1:{}{}", port, path)
}

/// A worker process started directly, without a supervisor.
pub struct WorkerProcess {
    pub port: u16,
    pub child: Child,
}

impl WorkerProcess {
    /// Start worker `index` of a pool of `pool_size` sharing `metrics_dir` and `store`.
    pub fn spawn(index: u32, pool_size: u16, port: u16, metrics_dir: &Path, store: &Path) -> Self {
        let child = Command::new(WORKER_BIN)
            .envs(worker_env(store))
            .env("MIRRORGATE_WORKERS", pool_size.to_string())
            .env("PORT", port.to_string())
            .env("WORKER_INDEX", index.to_string())
            .env("METRICS_DIR", metrics_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .expect("spawn worker");
        Self { port, child }
    }
}

/// Poll `/health/live` until it answers 200.
pub async fn wait_live(client: &reqwest::Client, port: u16) {
    for _ in 0..300 {
        if let Ok(response) = client.get(url(port, "/health/live")).send().await {
            if response.status().is_success() {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("worker on port {} never became live", port);
}

/// Sum every sample of `name` whose line contains `matching`.
pub fn sum_samples(exposition: &str, name: &str, matching: &str) -> f64 {
    let prefix = format!("{}{{", name);
    exposition
        .lines()
        .filter(|line| line.starts_with(&prefix) && line.contains(matching))
        .filter_map(|line| line.rsplit(' ').next()?.parse::<f64>().ok())
        .sum()
}

pub fn shard_files(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .expect("read metrics dir")
        .filter_map(Result::ok)
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .map(is_shard_file_name)
                .unwrap_or(false)
        })
        .map(|entry| entry.path())
        .collect()
}
