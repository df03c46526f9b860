//! Redis cache tier.
//!
//! One [`ConnectionManager`] per worker process; it multiplexes commands over
//! a single connection and reconnects on its own after a drop. Entry TTLs are
//! delegated to Redis (`SET ... EX`).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mirrorgate_core::{MirrorError, MirrorResult};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::reconnect::CacheConnector;
use super::CacheTier;

/// Error type for Redis cache operations.
#[derive(Debug, thiserror::Error)]
pub enum RedisTierError {
    /// The configured URL could not be parsed.
    #[error("Invalid Redis URL: {0}")]
    InvalidUrl(String),

    /// Initial connection failed.
    #[error("Redis connection failed: {0}")]
    Connect(String),

    /// A command returned an error.
    #[error("Redis command {command} failed: {reason}")]
    Command {
        command: &'static str,
        reason: String,
    },
}

impl RedisTierError {
    fn command(command: &'static str, err: redis::RedisError) -> Self {
        RedisTierError::Command {
            command,
            reason: err.to_string(),
        }
    }
}

impl From<RedisTierError> for MirrorError {
    fn from(e: RedisTierError) -> Self {
        MirrorError::cache_unavailable(e)
    }
}

/// Cache tier backed by a shared Redis instance.
#[derive(Clone)]
pub struct RedisCacheTier {
    conn: ConnectionManager,
}

impl RedisCacheTier {
    /// Connect to `url` (for example `redis://cache:6379/0`).
    pub async fn connect(url: &str) -> Result<Self, RedisTierError> {
        let client =
            redis::Client::open(url).map_err(|e| RedisTierError::InvalidUrl(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| RedisTierError::Connect(e.to_string()))?;
        Ok(Self { conn })
    }
}

/// Connects a [`RedisCacheTier`] to a fixed URL.
#[derive(Debug, Clone)]
pub struct RedisConnector {
    url: String,
}

impl RedisConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl CacheConnector for RedisConnector {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn connect(&self) -> MirrorResult<Arc<dyn CacheTier>> {
        let tier = RedisCacheTier::connect(&self.url).await?;
        Ok(Arc::new(tier))
    }
}

/// Escape glob metacharacters so a prefix matches literally in `SCAN MATCH`.
fn escape_glob(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[async_trait]
impl CacheTier for RedisCacheTier {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> MirrorResult<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn
            .get(key)
            .await
            .map_err(|e| RedisTierError::command("GET", e))?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> MirrorResult<()> {
        let mut conn = self.conn.clone();
        // EX has whole-second resolution; never round a live entry down to 0.
        let seconds = ttl.as_secs().max(1);
        let _: () = conn
            .set_ex(key, value, seconds)
            .await
            .map_err(|e| RedisTierError::command("SET", e))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> MirrorResult<bool> {
        let mut conn = self.conn.clone();
        let removed: u64 = conn
            .del(key)
            .await
            .map_err(|e| RedisTierError::command("DEL", e))?;
        Ok(removed > 0)
    }

    async fn flush_prefix(&self, prefix: &str) -> MirrorResult<u64> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", escape_glob(prefix));
        let mut cursor: u64 = 0;
        let mut removed: u64 = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(500)
                .query_async(&mut conn)
                .await
                .map_err(|e| RedisTierError::command("SCAN", e))?;

            if !keys.is_empty() {
                let count: u64 = conn
                    .del(&keys)
                    .await
                    .map_err(|e| RedisTierError::command("DEL", e))?;
                removed += count;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(removed)
    }

    async fn ping(&self) -> MirrorResult<()> {
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| RedisTierError::command("PING", e))?;
        if pong != "PONG" {
            return Err(MirrorError::cache_unavailable(format!(
                "unexpected PING reply: {}",
                pong
            )));
        }
        Ok(())
    }
}
