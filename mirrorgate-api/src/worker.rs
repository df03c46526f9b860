//! Worker Process Bootstrap
//!
//! Order matters: the shard file is claimed first so a worker that cannot
//! report metrics never serves traffic, then the store is opened, then the
//! port is bound. Each failure maps to its own exit code so the supervisor can
//! tell them apart.

use std::sync::Arc;

use mirrorgate_core::{MirrorError, MirrorResult, StoreBackendKind, WorkerExit};
use mirrorgate_metrics::{ShardWriter, WorkerMetrics};
use mirrorgate_storage::{
    Backoff, CacheAside, CacheConnector, CacheTier, DocumentStore, LmdbDocumentStore,
    MemoryCacheTier, ReconnectingCacheTier, RedisConnector, WorkerAccessor,
};
use tokio::net::TcpListener;

use crate::config::WorkerConfig;
use crate::db::PgDocumentStore;
use crate::routes::create_router;
use crate::state::AppState;
use crate::telemetry::MetricsObserver;

/// Run one worker until it is told to stop, and report how it ended.
pub async fn run(config: WorkerConfig) -> WorkerExit {
    let worker_index = config.api.worker_index;

    let metrics = match WorkerMetrics::new() {
        Ok(metrics) => metrics,
        Err(e) => {
            tracing::error!(error = %e, "Failed to register worker metrics");
            return WorkerExit::MetricsDirUnavailable;
        }
    };

    let shard = match ShardWriter::create(&config.api.metrics_dir, Some(worker_index)) {
        Ok(shard) => shard,
        Err(e) => {
            tracing::error!(error = %e, "Failed to claim a metrics shard");
            return WorkerExit::MetricsDirUnavailable;
        }
    };
    // An empty shard up front, so a scrape sees this worker before its first request.
    if let Err(e) = shard.flush(&metrics) {
        tracing::error!(error = %e, "Failed to write the initial metrics shard");
        return WorkerExit::MetricsDirUnavailable;
    }

    let store = match open_store(&config).await {
        Ok(store) => store,
        Err(e) => {
            tracing::error!(error = %e, backend = ?config.store.backend, "Failed to open document store");
            return WorkerExit::StoreUnavailable;
        }
    };

    if config.cache_disabled_for_pool() {
        tracing::warn!(
            pool_size = config.pool_size,
            "No shared cache URL for a multi-worker pool, caching disabled"
        );
    }
    let accessor = build_accessor(&config, open_cache(&config).await, store, &metrics);

    let addr = config.api.listen_addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%addr, error = %e, "Failed to bind");
            return WorkerExit::BindFailed;
        }
    };

    tracing::info!(
        %addr,
        worker_index,
        pid = std::process::id(),
        shard = %shard.path().display(),
        "Worker listening"
    );

    let state = AppState::new(accessor, metrics, shard, config.api.clone());
    let exit = state.exit.clone();
    let app = create_router(state);

    let shutdown = {
        let exit = exit.clone();
        async move {
            tokio::select! {
                _ = shutdown_signal() => exit.trigger(WorkerExit::Graceful),
                _ = exit.wait() => {}
            }
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        tracing::error!(error = %e, "Listener failed");
        return exit.current().unwrap_or(WorkerExit::BindFailed);
    }

    let outcome = exit.current().unwrap_or(WorkerExit::Graceful);
    tracing::info!(exit = %outcome, "Worker stopped");
    outcome
}

/// Assemble the accessor with instrumentation and limits from `config`.
pub fn build_accessor(
    config: &WorkerConfig,
    cache: Arc<dyn CacheTier>,
    store: Arc<dyn DocumentStore>,
    metrics: &WorkerMetrics,
) -> WorkerAccessor {
    CacheAside::new(cache, store, config.cache.clone())
        .with_observer(Arc::new(MetricsObserver::new(metrics.clone())))
        .with_store_timeout(config.store_timeout())
        .with_max_value_bytes(config.api.max_value_bytes)
}

/// Open the configured document store.
pub async fn open_store(config: &WorkerConfig) -> MirrorResult<Arc<dyn DocumentStore>> {
    match config.store.backend {
        StoreBackendKind::Lmdb => {
            let path = config.store.path.clone();
            let map_size_mb = config.store.map_size_mb;
            let store = tokio::task::spawn_blocking(move || {
                LmdbDocumentStore::open(path, map_size_mb)
            })
            .await
            .map_err(|e| MirrorError::store_unavailable(format!("open task failed: {}", e)))??;
            tracing::info!(path = %store.path().display(), "LMDB document store ready");
            Ok(Arc::new(store))
        }
        StoreBackendKind::Postgres => {
            let store = tokio::time::timeout(config.db.timeout, PgDocumentStore::connect(&config.db))
                .await
                .map_err(|_| MirrorError::store_unavailable("timed out connecting to postgres"))??;
            Ok(Arc::new(store))
        }
    }
}

/// Connect the configured cache tier.
///
/// The cache is allowed to be down. If Redis cannot be reached at startup the
/// worker serves every read from the store while a background task keeps
/// retrying the connection.
pub async fn open_cache(config: &WorkerConfig) -> Arc<dyn CacheTier> {
    let Some(url) = config.cache.url.as_deref() else {
        return Arc::new(MemoryCacheTier::new());
    };

    let attempt_timeout = config.cache.timeout.saturating_mul(4);
    let connector = RedisConnector::new(url);
    let err = match tokio::time::timeout(attempt_timeout, connector.connect()).await {
        Ok(Ok(tier)) => {
            tracing::info!("Redis cache tier connected");
            return tier;
        }
        Ok(Err(e)) => e.to_string(),
        Err(_) => "connect timed out".to_string(),
    };

    tracing::error!(error = %err, "Redis unavailable, serving from the store and retrying");
    let backoff = Backoff {
        attempt_timeout,
        ..Backoff::default()
    };
    Arc::new(ReconnectingCacheTier::spawn(connector, backoff))
}

/// Resolves on SIGINT, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("SIGINT received"),
        _ = terminate => tracing::info!("SIGTERM received"),
    }
}
