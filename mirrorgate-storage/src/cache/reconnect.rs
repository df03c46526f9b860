//! Cache tier that keeps trying to connect in the background.
//!
//! Until the first connection succeeds every call fails with
//! `CacheUnavailable`, so reads bypass and readiness reports the cache
//! degraded. Once connected, calls go straight to the inner tier; reconnects
//! after that are the inner tier's job.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mirrorgate_core::{MirrorError, MirrorResult};
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;

use super::CacheTier;

/// Opens a connected cache tier.
#[async_trait]
pub trait CacheConnector: Send + Sync + 'static {
    /// Backend name reported while not yet connected.
    fn name(&self) -> &'static str;

    async fn connect(&self) -> MirrorResult<Arc<dyn CacheTier>>;
}

/// Retry schedule for the background connect loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
    /// Upper bound for one connect attempt.
    pub attempt_timeout: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
            attempt_timeout: Duration::from_secs(5),
        }
    }
}

impl Backoff {
    fn next(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max)
    }
}

/// Cache tier whose connection is established lazily by a background task.
pub struct ReconnectingCacheTier {
    name: &'static str,
    connected: Arc<OnceCell<Arc<dyn CacheTier>>>,
    task: JoinHandle<()>,
}

impl ReconnectingCacheTier {
    /// Start connecting with `connector`, retrying on `backoff` until it succeeds.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn spawn<C: CacheConnector>(connector: C, backoff: Backoff) -> Self {
        let name = connector.name();
        let connected = Arc::new(OnceCell::new());
        let task = tokio::spawn(connect_loop(connector, backoff, Arc::clone(&connected)));
        Self {
            name,
            connected,
            task,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.initialized()
    }

    fn inner(&self) -> MirrorResult<&Arc<dyn CacheTier>> {
        self.connected
            .get()
            .ok_or_else(|| MirrorError::cache_unavailable(format!("{} not connected yet", self.name)))
    }
}

impl Drop for ReconnectingCacheTier {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn connect_loop<C: CacheConnector>(
    connector: C,
    backoff: Backoff,
    connected: Arc<OnceCell<Arc<dyn CacheTier>>>,
) {
    let mut delay = backoff.initial;
    let mut attempts: u32 = 0;
    loop {
        attempts += 1;
        match tokio::time::timeout(backoff.attempt_timeout, connector.connect()).await {
            Ok(Ok(tier)) => {
                tracing::info!(tier = connector.name(), attempts, "Cache tier connected");
                let _ = connected.set(tier);
                return;
            }
            Ok(Err(e)) => {
                tracing::warn!(tier = connector.name(), attempts, retry_in = ?delay, error = %e, "Cache connect failed");
            }
            Err(_) => {
                tracing::warn!(tier = connector.name(), attempts, retry_in = ?delay, "Cache connect timed out");
            }
        }
        tokio::time::sleep(delay).await;
        delay = backoff.next(delay);
    }
}

#[async_trait]
impl CacheTier for ReconnectingCacheTier {
    fn name(&self) -> &'static str {
        self.connected.get().map_or(self.name, |tier| tier.name())
    }

    async fn get(&self, key: &str) -> MirrorResult<Option<Vec<u8>>> {
        self.inner()?.get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> MirrorResult<()> {
        self.inner()?.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> MirrorResult<bool> {
        self.inner()?.delete(key).await
    }

    async fn flush_prefix(&self, prefix: &str) -> MirrorResult<u64> {
        self.inner()?.flush_prefix(prefix).await
    }

    async fn ping(&self) -> MirrorResult<()> {
        self.inner()?.ping().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheTier;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails its first `failures` attempts, then hands out a memory tier.
    struct FlakyConnector {
        failures: u32,
        attempts: Arc<AtomicU32>,
    }

    #[async_trait]
    impl CacheConnector for FlakyConnector {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn connect(&self) -> MirrorResult<Arc<dyn CacheTier>> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt <= self.failures {
                return Err(MirrorError::cache_unavailable("connection refused"));
            }
            Ok(Arc::new(MemoryCacheTier::new()))
        }
    }

    fn backoff() -> Backoff {
        Backoff {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(4),
            attempt_timeout: Duration::from_secs(1),
        }
    }

    async fn wait_connected(tier: &ReconnectingCacheTier) {
        for _ in 0..100 {
            if tier.is_connected() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
        panic!("cache tier never connected");
    }

    #[test]
    fn test_backoff_doubles_up_to_max() {
        let b = backoff();
        assert_eq!(b.next(Duration::from_secs(1)), Duration::from_secs(2));
        assert_eq!(b.next(Duration::from_secs(3)), Duration::from_secs(4));
        assert_eq!(b.next(Duration::MAX), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fails_until_connected_then_serves() {
        let attempts = Arc::new(AtomicU32::new(0));
        let tier = ReconnectingCacheTier::spawn(
            FlakyConnector {
                failures: 3,
                attempts: Arc::clone(&attempts),
            },
            backoff(),
        );

        assert_eq!(tier.name(), "flaky");
        assert!(matches!(
            tier.get("ns:a").await,
            Err(MirrorError::CacheUnavailable { .. })
        ));
        assert!(tier.ping().await.is_err());

        wait_connected(&tier).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        assert_eq!(tier.name(), "memory");

        assert_eq!(tier.get("ns:a").await.unwrap(), None);
        tier.set("ns:a", b"v".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(tier.get("ns:a").await.unwrap(), Some(b"v".to_vec()));
        tier.ping().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_accessor_reads_bypass_until_connected() {
        use crate::accessor::{CacheAside, ReadMode, ReadSource};
        use crate::store::MemoryDocumentStore;
        use mirrorgate_core::{CacheSettings, DocumentKey};

        let tier = Arc::new(ReconnectingCacheTier::spawn(
            FlakyConnector {
                failures: 2,
                attempts: Arc::new(AtomicU32::new(0)),
            },
            backoff(),
        ));
        let accessor = CacheAside::new(
            Arc::clone(&tier),
            Arc::new(MemoryDocumentStore::new()),
            CacheSettings::default(),
        );
        let key = DocumentKey::parse("late-cache").unwrap();
        accessor.put(&key, b"v1".to_vec()).await.unwrap();

        let early = accessor.get(&key, ReadMode::Cached).await.unwrap().unwrap();
        assert_eq!(early.source, ReadSource::Bypass);

        wait_connected(&tier).await;
        let first = accessor.get(&key, ReadMode::Cached).await.unwrap().unwrap();
        assert_eq!(first.source, ReadSource::Miss);
        let second = accessor.get(&key, ReadMode::Cached).await.unwrap().unwrap();
        assert_eq!(second.source, ReadSource::Hit);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_stops_retrying() {
        let attempts = Arc::new(AtomicU32::new(0));
        let tier = ReconnectingCacheTier::spawn(
            FlakyConnector {
                failures: u32::MAX,
                attempts: Arc::clone(&attempts),
            },
            backoff(),
        );
        tokio::time::sleep(Duration::from_secs(3)).await;
        drop(tier);

        let seen = attempts.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), seen);
    }
}
