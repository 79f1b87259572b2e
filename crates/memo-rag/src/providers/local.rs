//! Local chunk store backed by the SQLite memo database

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::storage::MemoDb;
use crate::types::{Candidate, ChunkRecord};

use super::document_store::ChunkStore;

/// Chunk store wrapping [`MemoDb`]
pub struct SqliteChunkStore {
    db: Arc<MemoDb>,
}

impl SqliteChunkStore {
    /// Create from an existing database handle
    pub fn new(db: Arc<MemoDb>) -> Self {
        Self { db }
    }
}

/// Run a synchronous database call on the blocking pool
async fn blocking<F, T>(db: &Arc<MemoDb>, op: F) -> Result<T>
where
    F: FnOnce(&MemoDb) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = Arc::clone(db);
    tokio::task::spawn_blocking(move || op(&db))
        .await
        .map_err(|e| Error::Internal(format!("Task join error: {}", e)))?
}

#[async_trait]
impl ChunkStore for SqliteChunkStore {
    async fn has_chunks(&self, owner_id: &str) -> Result<bool> {
        let owner_id = owner_id.to_string();
        blocking(&self.db, move |db| db.has_chunks(&owner_id)).await
    }

    async fn nearest_neighbors(
        &self,
        owner_id: &str,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<Candidate>> {
        let owner_id = owner_id.to_string();
        let query = query.to_vec();
        blocking(&self.db, move |db| db.nearest_neighbors(&owner_id, &query, limit)).await
    }

    async fn list_chunks(&self, owner_id: &str, limit: usize) -> Result<Vec<ChunkRecord>> {
        let owner_id = owner_id.to_string();
        blocking(&self.db, move |db| db.list_chunks(&owner_id, limit)).await
    }

    async fn write_chunks(&self, chunks: &[ChunkRecord]) -> Result<()> {
        let chunks = chunks.to_vec();
        blocking(&self.db, move |db| db.write_chunks(&chunks)).await
    }

    async fn mark_memo_deleted(&self, owner_id: &str, memo_id: &str) -> Result<usize> {
        let owner_id = owner_id.to_string();
        let memo_id = memo_id.to_string();
        blocking(&self.db, move |db| db.mark_memo_deleted(&owner_id, &memo_id)).await
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(blocking(&self.db, |db| db.ping()).await.is_ok())
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn test_store_roundtrip_through_blocking_pool() {
        let store = SqliteChunkStore::new(Arc::new(MemoDb::in_memory().unwrap()));
        assert!(!assert_ok!(store.has_chunks("alice").await));

        let chunk = ChunkRecord::new("alice", "m1", 0, "call the plumber", vec![1.0, 0.0]);
        assert_ok!(store.write_chunks(&[chunk]).await);

        assert!(assert_ok!(store.has_chunks("alice").await));
        let hits = assert_ok!(store.nearest_neighbors("alice", &[1.0, 0.0], 5).await);
        assert_eq!(hits.len(), 1);
        assert!(assert_ok!(store.health_check().await));
    }
}
