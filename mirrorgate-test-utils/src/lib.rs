//! Mirrorgate Test Utilities
//!
//! Shared test infrastructure for the Mirrorgate workspace:
//! - Fault-injecting cache tier and document store
//! - Proptest generators for keys, values and access sequences
//! - Fixtures for metrics directories and shard files
//! - Assertions for the error taxonomy

pub use mirrorgate_core::{
    CacheSettings, DocumentKey, DocumentRecord, MirrorError, MirrorResult, WritePolicy,
};
pub use mirrorgate_metrics::{ShardSnapshot, WorkerMetrics};
pub use mirrorgate_storage::{
    CacheAside, CacheTier, DocumentStore, MemoryCacheTier, MemoryDocumentStore,
};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

// ============================================================================
// FAULT INJECTION
// ============================================================================

/// In-memory cache tier that can be switched off at runtime.
///
/// While unavailable every call fails with `CacheUnavailable`; stored entries
/// survive and reappear once the tier is switched back on.
#[derive(Debug, Default)]
pub struct FlakyCacheTier {
    inner: MemoryCacheTier,
    down: AtomicBool,
    failures: AtomicU64,
}

impl FlakyCacheTier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.down.store(!available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        !self.down.load(Ordering::SeqCst)
    }

    /// Calls rejected while the tier was down.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &MemoryCacheTier {
        &self.inner
    }

    fn check(&self) -> MirrorResult<()> {
        if self.is_available() {
            Ok(())
        } else {
            self.failures.fetch_add(1, Ordering::SeqCst);
            Err(MirrorError::cache_unavailable("injected cache outage"))
        }
    }
}

#[async_trait]
impl CacheTier for FlakyCacheTier {
    fn name(&self) -> &'static str {
        "flaky-memory"
    }

    async fn get(&self, key: &str) -> MirrorResult<Option<Vec<u8>>> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> MirrorResult<()> {
        self.check()?;
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> MirrorResult<bool> {
        self.check()?;
        self.inner.delete(key).await
    }

    async fn flush_prefix(&self, prefix: &str) -> MirrorResult<u64> {
        self.check()?;
        self.inner.flush_prefix(prefix).await
    }

    async fn ping(&self) -> MirrorResult<()> {
        self.check()
    }
}

/// In-memory document store that can be switched off at runtime.
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: MemoryDocumentStore,
    down: AtomicBool,
    reads: AtomicU64,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.down.store(!available, Ordering::SeqCst);
    }

    /// Store reads attempted, including failed ones.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    fn check(&self) -> MirrorResult<()> {
        if self.down.load(Ordering::SeqCst) {
            Err(MirrorError::store_unavailable("injected store outage"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DocumentStore for FlakyStore {
    fn name(&self) -> &'static str {
        "flaky-memory"
    }

    async fn get(&self, key: &DocumentKey) -> MirrorResult<Option<DocumentRecord>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.inner.get(key).await
    }

    async fn put(&self, key: &DocumentKey, value: Vec<u8>) -> MirrorResult<DocumentRecord> {
        self.check()?;
        self.inner.put(key, value).await
    }

    async fn count(&self) -> MirrorResult<u64> {
        self.check()?;
        self.inner.count().await
    }

    async fn health_check(&self) -> MirrorResult<()> {
        self.check()
    }
}

/// Accessor over a flaky cache and a flaky store, plus handles to both.
pub fn flaky_accessor(
    settings: CacheSettings,
) -> (
    CacheAside<FlakyCacheTier, FlakyStore>,
    Arc<FlakyCacheTier>,
    Arc<FlakyStore>,
) {
    let cache = Arc::new(FlakyCacheTier::new());
    let store = Arc::new(FlakyStore::new());
    let accessor = CacheAside::new(Arc::clone(&cache), Arc::clone(&store), settings);
    (accessor, cache, store)
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    use super::*;
    use proptest::prelude::*;

    /// Keys drawn from a small alphabet so sequences revisit the same key.
    pub fn arb_document_key() -> impl Strategy<Value = DocumentKey> {
        "[a-z]{1,3}(/[a-z0-9]{1,3})?".prop_map(|raw| {
            DocumentKey::parse(raw).expect("generated keys are valid")
        })
    }

    pub fn arb_document_value() -> impl Strategy<Value = Vec<u8>> {
        prop::collection::vec(any::<u8>(), 0..256)
    }

    /// One step in an accessor workload.
    #[derive(Debug, Clone)]
    pub enum AccessOp {
        Get(DocumentKey),
        Refresh(DocumentKey),
        Put(DocumentKey, Vec<u8>),
        Invalidate(DocumentKey),
        CacheOutage(bool),
    }

    pub fn arb_access_op() -> impl Strategy<Value = AccessOp> {
        prop_oneof![
            4 => arb_document_key().prop_map(AccessOp::Get),
            1 => arb_document_key().prop_map(AccessOp::Refresh),
            3 => (arb_document_key(), arb_document_value())
                .prop_map(|(key, value)| AccessOp::Put(key, value)),
            1 => arb_document_key().prop_map(AccessOp::Invalidate),
            1 => any::<bool>().prop_map(AccessOp::CacheOutage),
        ]
    }

    pub fn arb_access_ops(max: usize) -> impl Strategy<Value = Vec<AccessOp>> {
        prop::collection::vec(arb_access_op(), 1..max)
    }

    pub fn arb_write_policy() -> impl Strategy<Value = WritePolicy> {
        prop_oneof![Just(WritePolicy::Invalidate), Just(WritePolicy::Overwrite)]
    }

    /// Request counts for a handful of simulated workers.
    pub fn arb_worker_request_counts() -> impl Strategy<Value = Vec<u32>> {
        prop::collection::vec(0u32..50, 1..6)
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    use super::*;
    use std::fs::{self, File};
    use std::path::{Path, PathBuf};
    use std::time::SystemTime;

    pub fn key(raw: &str) -> DocumentKey {
        DocumentKey::parse(raw).expect("fixture key is valid")
    }

    /// Cache settings with the given TTL and everything else defaulted.
    pub fn cache_settings(ttl: Duration) -> CacheSettings {
        CacheSettings::default().with_ttl(ttl)
    }

    /// A fresh metrics directory inside its own temp dir.
    pub fn metrics_dir() -> (tempfile::TempDir, PathBuf) {
        let temp = tempfile::TempDir::new().expect("create temp dir");
        let dir = temp.path().join("metrics");
        fs::create_dir(&dir).expect("create metrics dir");
        (temp, dir)
    }

    /// Worker metrics with `count` requests recorded on `path`.
    pub fn metrics_with_requests(path: &str, count: u32) -> WorkerMetrics {
        let metrics = WorkerMetrics::new().expect("register metrics");
        for _ in 0..count {
            metrics.record_request("GET", path, 200, Duration::from_millis(2));
        }
        metrics
    }

    /// Write `metrics` as a shard file named after `pid`, as an exited
    /// worker would have left it.
    pub fn write_shard(dir: &Path, pid: u32, metrics: &WorkerMetrics) -> PathBuf {
        let snapshot = ShardSnapshot::capture(pid, None, &metrics.gather());
        write_snapshot(dir, &format!("shard-{}-fixture.json", pid), &snapshot)
    }

    pub fn write_snapshot(dir: &Path, name: &str, snapshot: &ShardSnapshot) -> PathBuf {
        let path = dir.join(name);
        let bytes = serde_json::to_vec(snapshot).expect("serialize snapshot");
        fs::write(&path, bytes).expect("write shard");
        path
    }

    pub fn set_modified(path: &Path, at: SystemTime) {
        File::options()
            .write(true)
            .open(path)
            .and_then(|file| file.set_modified(at))
            .expect("set shard mtime");
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    use super::*;

    pub fn assert_cache_unavailable<T: std::fmt::Debug>(result: &MirrorResult<T>) {
        match result {
            Err(MirrorError::CacheUnavailable { .. }) => {}
            other => panic!("Expected CacheUnavailable, got {:?}", other),
        }
    }

    pub fn assert_store_unavailable<T: std::fmt::Debug>(result: &MirrorResult<T>) {
        match result {
            Err(MirrorError::StoreUnavailable { .. }) => {}
            other => panic!("Expected StoreUnavailable, got {:?}", other),
        }
    }

    pub fn assert_metrics_dir_missing<T: std::fmt::Debug>(result: &MirrorResult<T>) {
        match result {
            Err(MirrorError::MetricsDirMissing { .. }) => {}
            other => panic!("Expected MetricsDirMissing, got {:?}", other),
        }
    }

    pub fn assert_validation_error<T: std::fmt::Debug>(result: &MirrorResult<T>) {
        match result {
            Err(MirrorError::Validation(_)) => {}
            other => panic!("Expected Validation error, got {:?}", other),
        }
    }
}
