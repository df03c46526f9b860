//! Cache-aside accessor.
//!
//! Reads go cache first and fall through to the store on a miss, populating
//! the cache with a fixed TTL. Writes go to the store first and then either
//! invalidate or overwrite the cached copy. The cache is allowed to fail at
//! any point: reads degrade to the store and writes log the stale copy. The
//! store is not: its failures fail the call with `StoreUnavailable`.
//!
//! Every cache and store call is bounded by a timeout. No call is retried.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mirrorgate_core::{
    validate_value_size, CacheSettings, ComponentCheck, DocumentKey, DocumentRecord, MirrorError,
    MirrorResult, WritePolicy, DEFAULT_MAX_VALUE_BYTES,
};
use tracing::warn;

use crate::cache::{CacheStats, CacheTier, NamespacedKey};
use crate::store::DocumentStore;

/// The accessor type every worker holds.
pub type WorkerAccessor = CacheAside<dyn CacheTier, dyn DocumentStore>;

/// How a read treats the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadMode {
    /// Serve from the cache when possible.
    #[default]
    Cached,
    /// Skip the cache lookup, read the store, and repopulate the cache.
    Refresh,
}

/// Where a successful read was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadSource {
    /// Served from the cache tier.
    Hit,
    /// Cache missed; read from the store and populated.
    Miss,
    /// Cache skipped (disabled, refresh, or unavailable); read from the store.
    Bypass,
}

impl ReadSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadSource::Hit => "hit",
            ReadSource::Miss => "miss",
            ReadSource::Bypass => "bypass",
        }
    }
}

/// A document together with where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRead {
    pub record: DocumentRecord,
    pub source: ReadSource,
}

impl CacheRead {
    pub fn is_hit(&self) -> bool {
        self.source == ReadSource::Hit
    }
}

/// What a write did to the cached copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheUpdate {
    /// Cached copy deleted.
    Invalidated,
    /// Cached copy replaced with the new record.
    Refreshed,
    /// Cache call failed; an older copy may be served until it expires.
    Stale,
    /// Cache disabled.
    Skipped,
}

impl CacheUpdate {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheUpdate::Invalidated => "invalidated",
            CacheUpdate::Refreshed => "refreshed",
            CacheUpdate::Stale => "stale",
            CacheUpdate::Skipped => "skipped",
        }
    }
}

/// Result of a durable write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOutcome {
    pub record: DocumentRecord,
    pub cache: CacheUpdate,
}

/// Outcome of one cache lookup, as reported to an [`AccessObserver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupOutcome {
    Hit,
    Miss,
    /// The tier failed or timed out.
    Error,
    /// The lookup was not attempted.
    Skipped,
}

impl LookupOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            LookupOutcome::Hit => "hit",
            LookupOutcome::Miss => "miss",
            LookupOutcome::Error => "error",
            LookupOutcome::Skipped => "skipped",
        }
    }
}

/// Hook for instrumentation. Both methods default to no-ops.
pub trait AccessObserver: Send + Sync {
    fn cache_lookup(&self, _outcome: LookupOutcome) {}

    fn store_operation(&self, _operation: &'static str, _succeeded: bool, _elapsed: Duration) {}
}

/// Observer that records nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl AccessObserver for NoopObserver {}

#[derive(Debug, Default)]
struct AccessCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    bypasses: AtomicU64,
    errors: AtomicU64,
}

impl AccessCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            bypasses: self.bypasses.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Cache-aside accessor over a cache tier `C` and a document store `S`.
///
/// # Example
///
/// ```ignore
/// let accessor = CacheAside::new(cache, store, CacheSettings::from_env()?);
///
/// accessor.put(&key, body.to_vec()).await?;
/// if let Some(read) = accessor.get(&key, ReadMode::Cached).await? {
///     println!("{} bytes, served as {}", read.record.value.len(), read.source.as_str());
/// }
/// ```
pub struct CacheAside<C: ?Sized, S: ?Sized> {
    cache: Arc<C>,
    store: Arc<S>,
    settings: CacheSettings,
    store_timeout: Duration,
    max_value_bytes: usize,
    observer: Arc<dyn AccessObserver>,
    counters: Arc<AccessCounters>,
}

impl<C: ?Sized, S: ?Sized> Clone for CacheAside<C, S> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            store: Arc::clone(&self.store),
            settings: self.settings.clone(),
            store_timeout: self.store_timeout,
            max_value_bytes: self.max_value_bytes,
            observer: Arc::clone(&self.observer),
            counters: Arc::clone(&self.counters),
        }
    }
}

impl<C, S> CacheAside<C, S>
where
    C: CacheTier + ?Sized,
    S: DocumentStore + ?Sized,
{
    pub fn new(cache: Arc<C>, store: Arc<S>, settings: CacheSettings) -> Self {
        Self {
            cache,
            store,
            settings,
            store_timeout: Duration::from_secs(2),
            max_value_bytes: DEFAULT_MAX_VALUE_BYTES,
            observer: Arc::new(NoopObserver),
            counters: Arc::new(AccessCounters::default()),
        }
    }

    /// Attach an instrumentation hook.
    pub fn with_observer(mut self, observer: Arc<dyn AccessObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Set the upper bound for a single store call.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Set the largest value `put` accepts.
    pub fn with_max_value_bytes(mut self, max: usize) -> Self {
        self.max_value_bytes = max;
        self
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn max_value_bytes(&self) -> usize {
        self.max_value_bytes
    }

    /// Counters accumulated by this accessor and its clones.
    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }

    fn cache_key(&self, key: &DocumentKey) -> NamespacedKey {
        NamespacedKey::new(&self.settings.namespace, key)
    }

    async fn cache_call<T, F>(&self, operation: &'static str, call: F) -> MirrorResult<T>
    where
        F: Future<Output = MirrorResult<T>>,
    {
        let result = match tokio::time::timeout(self.settings.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(MirrorError::cache_unavailable(format!(
                "{} {} timed out after {:?}",
                self.cache.name(),
                operation,
                self.settings.timeout
            ))),
        };
        if result.is_err() {
            AccessCounters::bump(&self.counters.errors);
        }
        result
    }

    async fn store_call<T, F>(&self, operation: &'static str, call: F) -> MirrorResult<T>
    where
        F: Future<Output = MirrorResult<T>>,
    {
        let started = Instant::now();
        let result = match tokio::time::timeout(self.store_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(MirrorError::StoreUnavailable { reason })) => {
                Err(MirrorError::StoreUnavailable { reason })
            }
            Ok(Err(other)) => Err(MirrorError::store_unavailable(other)),
            Err(_) => Err(MirrorError::store_unavailable(format!(
                "{} {} timed out after {:?}",
                self.store.name(),
                operation,
                self.store_timeout
            ))),
        };
        self.observer
            .store_operation(operation, result.is_ok(), started.elapsed());
        result
    }

    fn record_lookup(&self, outcome: LookupOutcome) {
        let counter = match outcome {
            LookupOutcome::Hit => &self.counters.hits,
            LookupOutcome::Miss => &self.counters.misses,
            LookupOutcome::Error | LookupOutcome::Skipped => &self.counters.bypasses,
        };
        AccessCounters::bump(counter);
        self.observer.cache_lookup(outcome);
    }

    /// Read a document.
    ///
    /// Returns `Ok(None)` when the store has no such key; nothing is cached in
    /// that case. A cache failure is logged and the read is served from the
    /// store.
    pub async fn get(&self, key: &DocumentKey, mode: ReadMode) -> MirrorResult<Option<CacheRead>> {
        let cache_key = self.cache_key(key);
        let mut populate = self.settings.enabled;
        let mut source = ReadSource::Bypass;

        if !self.settings.enabled || mode == ReadMode::Refresh {
            self.record_lookup(LookupOutcome::Skipped);
        } else {
            match self.cache_call("get", self.cache.get(cache_key.as_str())).await {
                Ok(Some(bytes)) => match DocumentRecord::decode_payload(key.clone(), &bytes) {
                    Some(record) => {
                        self.record_lookup(LookupOutcome::Hit);
                        return Ok(Some(CacheRead {
                            record,
                            source: ReadSource::Hit,
                        }));
                    }
                    None => {
                        warn!(key = %key, cache = self.cache.name(), "Discarding undecodable cache entry");
                        self.record_lookup(LookupOutcome::Miss);
                        source = ReadSource::Miss;
                    }
                },
                Ok(None) => {
                    self.record_lookup(LookupOutcome::Miss);
                    source = ReadSource::Miss;
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Cache lookup failed, reading from store");
                    self.record_lookup(LookupOutcome::Error);
                    populate = false;
                }
            }
        }

        let Some(record) = self.store_call("get", self.store.get(key)).await? else {
            return Ok(None);
        };

        if populate {
            let payload = record.encode_payload();
            if let Err(e) = self
                .cache_call(
                    "set",
                    self.cache.set(cache_key.as_str(), payload, self.settings.ttl),
                )
                .await
            {
                warn!(key = %key, error = %e, "Failed to populate cache");
            }
        }

        Ok(Some(CacheRead { record, source }))
    }

    /// Write a document to the store, then update the cache per the write
    /// policy. A cache failure after the durable write is logged, not
    /// returned.
    pub async fn put(&self, key: &DocumentKey, value: Vec<u8>) -> MirrorResult<PutOutcome> {
        validate_value_size(&value, self.max_value_bytes)?;

        let record = self.store_call("put", self.store.put(key, value)).await?;

        if !self.settings.enabled {
            return Ok(PutOutcome {
                record,
                cache: CacheUpdate::Skipped,
            });
        }

        let cache_key = self.cache_key(key);
        let updated = match self.settings.write_policy {
            WritePolicy::Invalidate => self
                .cache_call("delete", self.cache.delete(cache_key.as_str()))
                .await
                .map(|_| CacheUpdate::Invalidated),
            WritePolicy::Overwrite => self
                .cache_call(
                    "set",
                    self.cache.set(
                        cache_key.as_str(),
                        record.encode_payload(),
                        self.settings.ttl,
                    ),
                )
                .await
                .map(|_| CacheUpdate::Refreshed),
        };

        let cache = match updated {
            Ok(update) => update,
            Err(e) => {
                warn!(
                    key = %key,
                    version = record.version,
                    error = %e,
                    "Document stored but cache update failed; cached copy may be stale until expiry"
                );
                CacheUpdate::Stale
            }
        };

        Ok(PutOutcome { record, cache })
    }

    /// Remove the cached copy of `key`. Idempotent; never touches the store.
    ///
    /// Returns whether an entry was removed. Fails with `CacheUnavailable`
    /// when the tier cannot be reached.
    pub async fn invalidate(&self, key: &DocumentKey) -> MirrorResult<bool> {
        if !self.settings.enabled {
            return Ok(false);
        }
        let cache_key = self.cache_key(key);
        self.cache_call("delete", self.cache.delete(cache_key.as_str()))
            .await
    }

    /// Drop every entry in this accessor's namespace.
    pub async fn flush(&self) -> MirrorResult<u64> {
        let prefix = NamespacedKey::prefix(&self.settings.namespace);
        self.cache_call("flush", self.cache.flush_prefix(&prefix))
            .await
    }

    /// Number of documents in the store.
    pub async fn document_count(&self) -> MirrorResult<u64> {
        self.store_call("count", self.store.count()).await
    }

    /// Probe the cache tier. A failing cache only degrades the worker.
    pub async fn check_cache(&self) -> ComponentCheck {
        let name = format!("cache:{}", self.cache.name());
        if !self.settings.enabled {
            return ComponentCheck::healthy(name);
        }
        let started = Instant::now();
        let check = match self.cache_call("ping", self.cache.ping()).await {
            Ok(()) => ComponentCheck::healthy(name),
            Err(e) => ComponentCheck::degraded(name, e.to_string()),
        };
        check.with_latency_ms(started.elapsed().as_millis() as u64)
    }

    /// Probe the document store.
    pub async fn check_store(&self) -> ComponentCheck {
        let name = format!("store:{}", self.store.name());
        let started = Instant::now();
        let check = match self.store_call("health", self.store.health_check()).await {
            Ok(()) => ComponentCheck::healthy(name),
            Err(e) => ComponentCheck::unhealthy(name, e.to_string()),
        };
        check.with_latency_ms(started.elapsed().as_millis() as u64)
    }
}
