//! Memo ingestion: chunk a transcript, embed the chunks, write them in one batch

mod chunker;

pub use chunker::{extract_keywords, TranscriptChunk, TranscriptChunker};

use std::sync::Arc;
use std::time::Instant;

use crate::config::ChunkingConfig;
use crate::error::{Error, Result};
use crate::providers::{ChunkStore, EmbeddingProvider};
use crate::types::ChunkRecord;

/// Largest transcript accepted for ingestion, in characters
pub const MAX_TRANSCRIPT_CHARS: usize = 200_000;

/// Turns transcripts into stored, embedded chunks
pub struct MemoIngestor {
    chunker: TranscriptChunker,
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn ChunkStore>,
}

impl MemoIngestor {
    pub fn new(
        config: &ChunkingConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn ChunkStore>,
    ) -> Self {
        Self {
            chunker: TranscriptChunker::new(config),
            embedder,
            store,
        }
    }

    /// Ingest one memo, returning the number of chunks written
    ///
    /// Re-ingesting a memo id overwrites chunks with matching indexes.
    pub async fn ingest(&self, owner_id: &str, memo_id: &str, transcript: &str) -> Result<usize> {
        let start = Instant::now();

        let transcript = transcript.trim();
        if transcript.is_empty() {
            return Err(Error::validation("transcript must not be empty"));
        }
        if transcript.chars().count() > MAX_TRANSCRIPT_CHARS {
            return Err(Error::validation(format!(
                "transcript must be at most {} characters",
                MAX_TRANSCRIPT_CHARS
            )));
        }

        let chunks = self.chunker.chunk(transcript);
        tracing::debug!("Memo {} split into {} chunks", memo_id, chunks.len());

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await?;

        if embeddings.len() != chunks.len() {
            return Err(Error::unavailable(
                self.embedder.name(),
                format!("expected {} embeddings, got {}", chunks.len(), embeddings.len()),
            ));
        }

        let dimensions = self.embedder.dimensions();
        let records: Vec<ChunkRecord> = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| {
                if embedding.len() != dimensions || embedding.iter().any(|v| !v.is_finite()) {
                    return Err(Error::unavailable(
                        self.embedder.name(),
                        format!("invalid embedding for chunk {}", chunk.index),
                    ));
                }
                Ok(ChunkRecord::new(owner_id, memo_id, chunk.index, chunk.text, embedding)
                    .with_keywords(chunk.keywords))
            })
            .collect::<Result<_>>()?;

        self.store.write_chunks(&records).await?;

        tracing::info!(
            "Ingested memo {} ({} chunks) in {}ms",
            memo_id,
            records.len(),
            start.elapsed().as_millis()
        );
        Ok(records.len())
    }

    /// Soft-delete a memo, returning how many chunks were flagged
    pub async fn delete(&self, owner_id: &str, memo_id: &str) -> Result<usize> {
        let deleted = self.store.mark_memo_deleted(owner_id, memo_id).await?;
        tracing::info!("Deleted memo {} ({} chunks)", memo_id, deleted);
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::SqliteChunkStore;
    use crate::storage::MemoDb;
    use async_trait::async_trait;
    use tokio_test::{assert_err, assert_ok};

    /// Embeds text as its length and vowel count
    struct CountingEmbedder;

    #[async_trait]
    impl EmbeddingProvider for CountingEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let vowels = text.chars().filter(|c| "aeiou".contains(*c)).count();
            Ok(vec![text.len() as f32, vowels as f32 + 1.0])
        }
        fn dimensions(&self) -> usize {
            2
        }
        async fn health_check(&self) -> Result<bool> {
            Ok(true)
        }
        fn name(&self) -> &str {
            "counting"
        }
    }

    fn ingestor() -> (MemoIngestor, Arc<dyn ChunkStore>) {
        let store: Arc<dyn ChunkStore> =
            Arc::new(SqliteChunkStore::new(Arc::new(MemoDb::in_memory().unwrap())));
        let config = ChunkingConfig {
            chunk_size: 60,
            overlap: 10,
            ..ChunkingConfig::default()
        };
        (
            MemoIngestor::new(&config, Arc::new(CountingEmbedder), Arc::clone(&store)),
            store,
        )
    }

    #[tokio::test]
    async fn test_ingest_writes_all_chunks() {
        let (ingestor, store) = ingestor();
        let transcript = "Call the vet about Biscuit. Her checkup is overdue. \
            Also book the groomer for next week. Ask about flea treatment.";

        let written = assert_ok!(ingestor.ingest("alice", "memo-1", transcript).await);
        assert!(written > 1);

        let stored = assert_ok!(store.list_chunks("alice", 100).await);
        assert_eq!(stored.len(), written);
        assert!(stored.iter().all(|c| c.memo_id == "memo-1" && !c.keywords.is_empty()));
    }

    #[tokio::test]
    async fn test_empty_transcript_rejected() {
        let (ingestor, _) = ingestor();
        let err = assert_err!(ingestor.ingest("alice", "memo-1", "   ").await);
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_delete_hides_memo() {
        let (ingestor, store) = ingestor();
        assert_ok!(ingestor.ingest("alice", "memo-1", "Water the plants on Sunday.").await);
        assert!(assert_ok!(store.has_chunks("alice").await));

        assert_eq!(assert_ok!(ingestor.delete("alice", "memo-1").await), 1);
        assert!(!assert_ok!(store.has_chunks("alice").await));
        assert_eq!(assert_ok!(ingestor.delete("alice", "memo-1").await), 0);
    }
}
