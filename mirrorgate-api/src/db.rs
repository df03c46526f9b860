//! PostgreSQL Document Store
//!
//! Connection pooling with deadpool-postgres and a [`DocumentStore`]
//! implementation over a single `documents` table. The version bump happens
//! inside the upsert, so concurrent writers from different workers are
//! serialized by the row lock.

use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use mirrorgate_core::{
    env_parse, ConfigError, DocumentKey, DocumentRecord, EnvLookup, MirrorError, MirrorResult,
    Timestamp,
};
use mirrorgate_storage::DocumentStore;
use std::time::Duration;
use tokio_postgres::NoTls;

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Wait limit when checking a connection out of the pool
    pub timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "mirrorgate".to_string(),
            user: "postgres".to_string(),
            password: "".to_string(),
            max_size: 16,
            timeout: Duration::from_secs(5),
        }
    }
}

impl DbConfig {
    /// Read `MIRRORGATE_DB_*` from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&mirrorgate_core::process_env)
    }

    pub fn from_lookup(env: &impl EnvLookup) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            host: env_parse(env, "MIRRORGATE_DB_HOST", defaults.host)?,
            port: env_parse(env, "MIRRORGATE_DB_PORT", defaults.port)?,
            dbname: env_parse(env, "MIRRORGATE_DB_NAME", defaults.dbname)?,
            user: env_parse(env, "MIRRORGATE_DB_USER", defaults.user)?,
            password: env.lookup("MIRRORGATE_DB_PASSWORD").unwrap_or_default(),
            max_size: env_parse(env, "MIRRORGATE_DB_POOL_SIZE", defaults.max_size)?,
            timeout: Duration::from_secs(env_parse(env, "MIRRORGATE_DB_TIMEOUT", 5u64)?),
        })
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> MirrorResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let mut pool_config = PoolConfig::new(self.max_size);
        pool_config.timeouts.wait = Some(self.timeout);
        cfg.pool = Some(pool_config);

        cfg.create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| MirrorError::store_unavailable(format!("Failed to create pool: {}", e)))
    }
}

// ============================================================================
// DOCUMENT STORE
// ============================================================================

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS documents (
    key TEXT PRIMARY KEY,
    value BYTEA NOT NULL,
    version BIGINT NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
)";

const UPSERT: &str = "INSERT INTO documents (key, value, version, updated_at)
    VALUES ($1, $2, 1, now())
    ON CONFLICT (key) DO UPDATE
        SET value = EXCLUDED.value,
            version = documents.version + 1,
            updated_at = EXCLUDED.updated_at
    RETURNING version, updated_at";

/// Document store backed by a PostgreSQL table.
#[derive(Clone)]
pub struct PgDocumentStore {
    pool: Pool,
}

impl PgDocumentStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Build the pool and make sure the `documents` table exists.
    pub async fn connect(config: &DbConfig) -> MirrorResult<Self> {
        let store = Self::new(config.create_pool()?);
        let conn = store.get_conn().await?;
        conn.batch_execute(SCHEMA).await.map_err(pg_error)?;
        tracing::info!(host = %config.host, dbname = %config.dbname, "Postgres document store ready");
        Ok(store)
    }

    /// Get the current pool size for observability.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }

    async fn get_conn(&self) -> MirrorResult<deadpool_postgres::Object> {
        self.pool.get().await.map_err(|e| {
            tracing::error!("Connection pool error: {:?}", e);
            MirrorError::store_unavailable(format!("connection pool: {}", e))
        })
    }
}

fn pg_error(err: tokio_postgres::Error) -> MirrorError {
    tracing::error!("Database error: {:?}", err);
    MirrorError::store_unavailable(format!("postgres: {}", err))
}

fn non_negative(version: i64) -> u64 {
    u64::try_from(version).unwrap_or(0)
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn get(&self, key: &DocumentKey) -> MirrorResult<Option<DocumentRecord>> {
        let conn = self.get_conn().await?;
        let row = conn
            .query_opt(
                "SELECT value, version, updated_at FROM documents WHERE key = $1",
                &[&key.as_str()],
            )
            .await
            .map_err(pg_error)?;

        Ok(row.map(|row| {
            let version: i64 = row.get(1);
            let updated_at: Timestamp = row.get(2);
            DocumentRecord {
                key: key.clone(),
                value: row.get(0),
                version: non_negative(version),
                updated_at,
            }
        }))
    }

    async fn put(&self, key: &DocumentKey, value: Vec<u8>) -> MirrorResult<DocumentRecord> {
        let conn = self.get_conn().await?;
        let row = conn
            .query_one(UPSERT, &[&key.as_str(), &value])
            .await
            .map_err(pg_error)?;

        let version: i64 = row.get(0);
        let updated_at: Timestamp = row.get(1);
        Ok(DocumentRecord {
            key: key.clone(),
            value,
            version: non_negative(version),
            updated_at,
        })
    }

    async fn count(&self) -> MirrorResult<u64> {
        let conn = self.get_conn().await?;
        let row = conn
            .query_one("SELECT COUNT(*) FROM documents", &[])
            .await
            .map_err(pg_error)?;
        let count: i64 = row.get(0);
        Ok(non_negative(count))
    }

    async fn health_check(&self) -> MirrorResult<()> {
        let conn = self.get_conn().await?;

        // Simple query to verify connectivity
        conn.query_one("SELECT 1", &[]).await.map_err(pg_error)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_db_config_defaults() {
        let config = DbConfig::from_lookup(&HashMap::new()).unwrap();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 5432);
        assert_eq!(config.dbname, "mirrorgate");
        assert_eq!(config.max_size, 16);
    }

    #[test]
    fn test_db_config_rejects_bad_port() {
        let env: HashMap<String, String> =
            [("MIRRORGATE_DB_PORT".to_string(), "x".to_string())].into_iter().collect();
        assert!(DbConfig::from_lookup(&env).is_err());
    }

    #[test]
    fn test_negative_counts_clamp_to_zero() {
        assert_eq!(non_negative(-1), 0);
        assert_eq!(non_negative(7), 7);
    }
}
