//! Persistent document store abstraction.
//!
//! The store is the source of truth. Documents never expire and are changed
//! only by [`DocumentStore::put`], which bumps the version atomically with the
//! write. Backend errors surface as
//! [`MirrorError::StoreUnavailable`](mirrorgate_core::MirrorError).

pub mod lmdb;
pub mod memory;

use async_trait::async_trait;
use mirrorgate_core::{DocumentKey, DocumentRecord, MirrorResult};

pub use lmdb::{LmdbDocumentStore, LmdbStoreError};
pub use memory::MemoryDocumentStore;

/// Durable key-addressed document store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Short backend name for logs and health output.
    fn name(&self) -> &'static str;

    /// Fetch the current record for `key`.
    async fn get(&self, key: &DocumentKey) -> MirrorResult<Option<DocumentRecord>>;

    /// Write `value` under `key` and return the stored record.
    ///
    /// The first write of a key yields version 1; each later write yields the
    /// previous version plus one.
    async fn put(&self, key: &DocumentKey, value: Vec<u8>) -> MirrorResult<DocumentRecord>;

    /// Number of stored documents.
    async fn count(&self) -> MirrorResult<u64>;

    /// Cheap round-trip used by readiness probes.
    async fn health_check(&self) -> MirrorResult<()>;
}
