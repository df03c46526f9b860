//! In-process cache tier.
//!
//! Used when no cache URL is configured and throughout the test suites. Entries
//! expire lazily: an expired entry is dropped the first time it is read. The
//! clock is `tokio::time::Instant`, so paused-time tests can step over a TTL.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use mirrorgate_core::MirrorResult;
use tokio::time::Instant;

use super::CacheTier;

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: Vec<u8>,
    /// `None` when the TTL runs past the clock's range.
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// DashMap-backed cache tier with TTL expiry.
#[derive(Debug, Default)]
pub struct MemoryCacheTier {
    entries: DashMap<String, MemoryEntry>,
}

impl MemoryCacheTier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|entry| !entry.value().is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry now instead of waiting for a read.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before - self.entries.len()
    }
}

#[async_trait]
impl CacheTier for MemoryCacheTier {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> MirrorResult<Option<Vec<u8>>> {
        let now = Instant::now();
        match self.entries.get(key) {
            None => return Ok(None),
            Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
            Some(_) => {}
        }
        // The read guard is released above; removing while holding it deadlocks.
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> MirrorResult<()> {
        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                value,
                expires_at: Instant::now().checked_add(ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> MirrorResult<bool> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, entry)| !entry.is_expired(now)))
    }

    async fn flush_prefix(&self, prefix: &str) -> MirrorResult<u64> {
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.starts_with(prefix));
        Ok((before - self.entries.len()) as u64)
    }

    async fn ping(&self) -> MirrorResult<()> {
        Ok(())
    }
}
