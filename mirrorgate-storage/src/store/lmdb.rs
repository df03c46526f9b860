//! LMDB-backed document store.
//!
//! Uses the heed crate (Rust bindings for LMDB). LMDB coordinates readers and
//! the single writer across processes through its lock file, so every worker
//! opens the same environment directory directly.
//!
//! # Record format
//!
//! Values are stored as `[version: u64 LE][updated_at millis: i64 LE][value]`,
//! the same layout the accessor writes to the cache tier.
//!
//! # Blocking
//!
//! heed calls block, so every operation runs on tokio's blocking pool. The
//! environment handle is cheap to clone into the closure.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use mirrorgate_core::{DocumentKey, DocumentRecord, MirrorError, MirrorResult};

use super::DocumentStore;

/// Error type for LMDB store operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment at {path}: {reason}")]
    EnvOpen { path: PathBuf, reason: String },

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// A stored record could not be decoded.
    #[error("Corrupt record for key {0}")]
    CorruptRecord(String),

    /// The blocking task running the operation was cancelled or panicked.
    #[error("Blocking task failed: {0}")]
    Task(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbStoreError> for MirrorError {
    fn from(e: LmdbStoreError) -> Self {
        MirrorError::store_unavailable(e)
    }
}

impl From<heed::Error> for LmdbStoreError {
    fn from(e: heed::Error) -> Self {
        LmdbStoreError::Transaction(e.to_string())
    }
}

/// Document store on a shared LMDB environment.
#[derive(Clone)]
pub struct LmdbDocumentStore {
    env: Env,
    db: Database<Bytes, Bytes>,
    path: PathBuf,
}

impl LmdbDocumentStore {
    /// Open (creating if needed) the environment at `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory holding `data.mdb` and `lock.mdb`
    /// * `map_size_mb` - Maximum size of the memory map in megabytes
    pub fn open<P: AsRef<Path>>(path: P, map_size_mb: usize) -> Result<Self, LmdbStoreError> {
        let path = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per process and never
        // truncated or remapped by this crate while transactions are live.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(&path)
        }
        .map_err(|e| LmdbStoreError::EnvOpen {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        let mut wtxn = env.write_txn()?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;
        wtxn.commit()?;

        Ok(Self { env, db, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self, key: &DocumentKey) -> Result<Option<DocumentRecord>, LmdbStoreError> {
        let rtxn = self.env.read_txn()?;
        match self.db.get(&rtxn, key.as_str().as_bytes())? {
            None => Ok(None),
            Some(bytes) => DocumentRecord::decode_payload(key.clone(), bytes)
                .map(Some)
                .ok_or_else(|| LmdbStoreError::CorruptRecord(key.to_string())),
        }
    }

    fn write(&self, key: &DocumentKey, value: Vec<u8>) -> Result<DocumentRecord, LmdbStoreError> {
        let raw_key = key.as_str().as_bytes();
        // The write transaction holds LMDB's writer lock, so the read of the
        // previous version and the write of the next one cannot interleave
        // with another process.
        let mut wtxn = self.env.write_txn()?;
        let previous = match self.db.get(&wtxn, raw_key)? {
            None => 0,
            Some(bytes) => DocumentRecord::decode_payload(key.clone(), bytes)
                .map(|record| record.version)
                .ok_or_else(|| LmdbStoreError::CorruptRecord(key.to_string()))?,
        };

        let record = DocumentRecord {
            key: key.clone(),
            value,
            version: previous + 1,
            updated_at: Utc::now(),
        };
        self.db.put(&mut wtxn, raw_key, &record.encode_payload())?;
        wtxn.commit()?;
        Ok(record)
    }

    fn len(&self) -> Result<u64, LmdbStoreError> {
        let rtxn = self.env.read_txn()?;
        Ok(self.db.len(&rtxn)?)
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T, LmdbStoreError>
    where
        T: Send + 'static,
        F: FnOnce(LmdbDocumentStore) -> Result<T, LmdbStoreError> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || op(store))
            .await
            .map_err(|e| LmdbStoreError::Task(e.to_string()))?
    }
}

#[async_trait]
impl DocumentStore for LmdbDocumentStore {
    fn name(&self) -> &'static str {
        "lmdb"
    }

    async fn get(&self, key: &DocumentKey) -> MirrorResult<Option<DocumentRecord>> {
        let key = key.clone();
        Ok(self.blocking(move |store| store.read(&key)).await?)
    }

    async fn put(&self, key: &DocumentKey, value: Vec<u8>) -> MirrorResult<DocumentRecord> {
        let key = key.clone();
        Ok(self.blocking(move |store| store.write(&key, value)).await?)
    }

    async fn count(&self) -> MirrorResult<u64> {
        Ok(self.blocking(|store| store.len()).await?)
    }

    async fn health_check(&self) -> MirrorResult<()> {
        Ok(self
            .blocking(|store| store.env.read_txn().map(drop).map_err(Into::into))
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (LmdbDocumentStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = LmdbDocumentStore::open(temp_dir.path(), 10).unwrap();
        (store, temp_dir)
    }

    fn key(raw: &str) -> DocumentKey {
        DocumentKey::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn test_missing_key_returns_none() {
        let (store, _dir) = create_test_store();
        assert!(store.get(&key("absent")).await.unwrap().is_none());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let (store, _dir) = create_test_store();
        let written = store.put(&key("a"), b"alpha".to_vec()).await.unwrap();
        assert_eq!(written.version, 1);

        let read = store.get(&key("a")).await.unwrap().unwrap();
        assert_eq!(read.value, b"alpha");
        assert_eq!(read.version, 1);
        assert_eq!(read.updated_at.timestamp_millis(), written.updated_at.timestamp_millis());
    }

    #[tokio::test]
    async fn test_versions_increment_by_one() {
        let (store, _dir) = create_test_store();
        for expected in 1..=5u64 {
            let record = store.put(&key("v"), vec![expected as u8]).await.unwrap();
            assert_eq!(record.version, expected);
        }
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_writers_never_share_a_version() {
        let (store, _dir) = create_test_store();
        let mut handles = Vec::new();
        for i in 0..16u8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.put(&key("hot"), vec![i]).await.unwrap().version
            }));
        }
        let mut versions = Vec::new();
        for handle in handles {
            versions.push(handle.await.unwrap());
        }
        versions.sort_unstable();
        assert_eq!(versions, (1..=16).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = LmdbDocumentStore::open(temp_dir.path(), 10).unwrap();
            store.put(&key("durable"), b"yes".to_vec()).await.unwrap();
            let env = store.env.clone();
            drop(store);
            env.prepare_for_closing().wait();
        }
        let store = LmdbDocumentStore::open(temp_dir.path(), 10).unwrap();
        let record = store.get(&key("durable")).await.unwrap().unwrap();
        assert_eq!(record.value, b"yes");
    }

    #[tokio::test]
    async fn test_health_check() {
        let (store, _dir) = create_test_store();
        store.health_check().await.unwrap();
    }

    #[test]
    fn test_error_maps_to_store_unavailable() {
        let err: MirrorError = LmdbStoreError::Transaction("MDB_PANIC".into()).into();
        assert!(matches!(err, MirrorError::StoreUnavailable { .. }));
    }
}
