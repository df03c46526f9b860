//! In-memory document store for development and tests.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use mirrorgate_core::{DocumentKey, DocumentRecord, MirrorError, MirrorResult};

use super::DocumentStore;

#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    documents: RwLock<HashMap<DocumentKey, DocumentRecord>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> MirrorError {
    MirrorError::store_unavailable("memory store lock poisoned")
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &DocumentKey) -> MirrorResult<Option<DocumentRecord>> {
        let documents = self.documents.read().map_err(|_| poisoned())?;
        Ok(documents.get(key).cloned())
    }

    async fn put(&self, key: &DocumentKey, value: Vec<u8>) -> MirrorResult<DocumentRecord> {
        let mut documents = self.documents.write().map_err(|_| poisoned())?;
        let version = documents.get(key).map_or(0, |record| record.version) + 1;
        let record = DocumentRecord {
            key: key.clone(),
            value,
            version,
            updated_at: Utc::now(),
        };
        documents.insert(key.clone(), record.clone());
        Ok(record)
    }

    async fn count(&self) -> MirrorResult<u64> {
        let documents = self.documents.read().map_err(|_| poisoned())?;
        Ok(documents.len() as u64)
    }

    async fn health_check(&self) -> MirrorResult<()> {
        Ok(())
    }
}
