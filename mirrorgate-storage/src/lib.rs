//! Mirrorgate Storage - cache tier, document store, and the accessor between them
//!
//! The [`CacheAside`] accessor is linked into every worker process. It talks
//! to a [`CacheTier`] (Redis in production, [`MemoryCacheTier`] otherwise)
//! and a [`DocumentStore`] (LMDB by default, Postgres through the API crate).

pub mod accessor;
pub mod cache;
pub mod store;

pub use accessor::{
    AccessObserver, CacheAside, CacheRead, CacheUpdate, LookupOutcome, NoopObserver, PutOutcome,
    ReadMode, ReadSource, WorkerAccessor,
};
pub use cache::{
    Backoff, CacheConnector, CacheStats, CacheTier, MemoryCacheTier, NamespacedKey,
    ReconnectingCacheTier, RedisCacheTier, RedisConnector, RedisTierError,
};
pub use store::{DocumentStore, LmdbDocumentStore, LmdbStoreError, MemoryDocumentStore};
