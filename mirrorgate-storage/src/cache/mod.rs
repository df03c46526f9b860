//! Cache tier abstraction.
//!
//! A cache tier is a volatile byte store with per-entry TTLs. It is never the
//! source of truth: every failure it reports is recoverable by going to the
//! document store instead. Implementations map their own errors onto
//! [`MirrorError::CacheUnavailable`](mirrorgate_core::MirrorError).

pub mod memory;
pub mod namespaced_key;
pub mod reconnect;
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;
use mirrorgate_core::MirrorResult;

pub use memory::MemoryCacheTier;
pub use namespaced_key::NamespacedKey;
pub use reconnect::{Backoff, CacheConnector, ReconnectingCacheTier};
pub use redis::{RedisCacheTier, RedisConnector, RedisTierError};

/// Volatile key-value store with TTL expiry.
#[async_trait]
pub trait CacheTier: Send + Sync {
    /// Short backend name for logs and health output.
    fn name(&self) -> &'static str;

    /// Fetch a live entry. Expired entries are reported as absent.
    async fn get(&self, key: &str) -> MirrorResult<Option<Vec<u8>>>;

    /// Insert or replace an entry that expires `ttl` from now.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> MirrorResult<()>;

    /// Remove an entry. Returns whether one existed.
    async fn delete(&self, key: &str) -> MirrorResult<bool>;

    /// Remove every entry whose key starts with `prefix`. Returns the count.
    async fn flush_prefix(&self, prefix: &str) -> MirrorResult<u64>;

    /// Round-trip check used by readiness probes.
    async fn ping(&self) -> MirrorResult<()>;
}

/// Accessor-level cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Reads that skipped the cache (disabled, refresh, or tier failure).
    pub bypasses: u64,
    /// Cache calls that failed or timed out.
    pub errors: u64,
}

impl CacheStats {
    /// Fraction of cache lookups that were hits, in `[0.0, 1.0]`.
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}
