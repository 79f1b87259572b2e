//! Chunk store provider trait for the persistent document store

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Candidate, ChunkRecord};

/// Trait for reading and writing a user's embedded chunks
///
/// Every read is scoped to one owner and skips soft-deleted chunks.
///
/// Implementations:
/// - `SqliteChunkStore`: SQLite file or in-memory database
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Whether the owner has at least one live chunk (fetches a single row)
    async fn has_chunks(&self, owner_id: &str) -> Result<bool>;

    /// Live chunks nearest to `query` by cosine similarity, best first
    async fn nearest_neighbors(
        &self,
        owner_id: &str,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<Candidate>>;

    /// A bounded page of live chunks, newest first
    async fn list_chunks(&self, owner_id: &str, limit: usize) -> Result<Vec<ChunkRecord>>;

    /// Batch write; a chunk with an existing `(owner, memo, index)` replaces it
    async fn write_chunks(&self, chunks: &[ChunkRecord]) -> Result<()>;

    /// Soft-delete every chunk of a memo, returning how many were flagged
    async fn mark_memo_deleted(&self, owner_id: &str, memo_id: &str) -> Result<usize>;

    /// Check if the store is reachable
    async fn health_check(&self) -> Result<bool>;

    /// Get provider name for logging
    fn name(&self) -> &str;
}
