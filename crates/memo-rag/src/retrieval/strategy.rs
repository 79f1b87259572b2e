//! Retrieval strategies: vector search with MMR, and keyword scoring

use async_trait::async_trait;
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

use crate::config::{RetrievalConfig, TimeoutConfig};
use crate::error::Error;
use crate::providers::{ChunkStore, EmbeddingProvider};
use crate::resilience::{with_timeout, with_timeout_retry};
use crate::types::{ChunkRecord, ContextChunk};

use super::similarity::select_by_mmr;

/// Why a strategy produced nothing; never leaves the retrieval engine
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("{0} timed out")]
    Timeout(String),

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("invalid embedding: {0}")]
    InvalidEmbedding(String),

    #[error("store query failed: {0}")]
    Store(String),
}

impl RetrievalError {
    fn from_store(e: Error) -> Self {
        match e {
            Error::UpstreamTimeout { label, .. } => Self::Timeout(label),
            other => Self::Store(other.to_string()),
        }
    }
}

/// One request's retrieval inputs
#[derive(Debug, Clone)]
pub struct RetrievalQuery {
    pub owner_id: String,
    pub question: String,
}

/// One rung of the retrieval ladder
#[async_trait]
pub trait RetrievalStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Skip this strategy when the existence probe failed
    fn requires_probe(&self) -> bool {
        false
    }

    async fn retrieve(&self, query: &RetrievalQuery) -> Result<Vec<ContextChunk>, RetrievalError>;
}

/// Embed the question, fetch nearest neighbours, diversify with MMR
pub struct VectorSearchStrategy {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn ChunkStore>,
    config: RetrievalConfig,
    timeouts: TimeoutConfig,
}

impl VectorSearchStrategy {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn ChunkStore>,
        config: RetrievalConfig,
        timeouts: TimeoutConfig,
    ) -> Self {
        Self {
            embedder,
            store,
            config,
            timeouts,
        }
    }

    async fn embed_question(&self, question: &str) -> Result<Vec<f32>, RetrievalError> {
        let embedding = with_timeout(self.embedder.embed(question), self.timeouts.embedding(), "embedding")
            .await
            .map_err(|e| match e {
                Error::UpstreamTimeout { label, .. } => RetrievalError::Timeout(label),
                other => RetrievalError::Embedding(other.to_string()),
            })?;

        validate_embedding(&embedding, self.embedder.dimensions())?;
        Ok(embedding)
    }
}

/// Reject empty, non-finite, or wrongly sized embeddings
pub fn validate_embedding(embedding: &[f32], dimensions: usize) -> Result<(), RetrievalError> {
    if embedding.is_empty() {
        return Err(RetrievalError::InvalidEmbedding("empty vector".to_string()));
    }
    if embedding.iter().any(|v| !v.is_finite()) {
        return Err(RetrievalError::InvalidEmbedding("non-finite component".to_string()));
    }
    if embedding.len() != dimensions {
        return Err(RetrievalError::InvalidEmbedding(format!(
            "expected {} dimensions, got {}",
            dimensions,
            embedding.len()
        )));
    }
    Ok(())
}

#[async_trait]
impl RetrievalStrategy for VectorSearchStrategy {
    fn name(&self) -> &str {
        "vector"
    }

    fn requires_probe(&self) -> bool {
        true
    }

    async fn retrieve(&self, query: &RetrievalQuery) -> Result<Vec<ContextChunk>, RetrievalError> {
        let embedding = self.embed_question(&query.question).await?;

        let candidates = with_timeout(
            self.store
                .nearest_neighbors(&query.owner_id, &embedding, self.config.candidate_pool),
            self.timeouts.vector_search(),
            "vector search",
        )
        .await
        .map_err(RetrievalError::from_store)?;

        tracing::debug!("Vector search returned {} candidates", candidates.len());

        Ok(select_by_mmr(
            candidates,
            &embedding,
            self.config.context_size,
            self.config.mmr_lambda,
        ))
    }
}

/// Score a page of recent chunks by whole-word term matches
pub struct KeywordSearchStrategy {
    store: Arc<dyn ChunkStore>,
    config: RetrievalConfig,
    timeouts: TimeoutConfig,
}

impl KeywordSearchStrategy {
    pub fn new(store: Arc<dyn ChunkStore>, config: RetrievalConfig, timeouts: TimeoutConfig) -> Self {
        Self {
            store,
            config,
            timeouts,
        }
    }
}

#[async_trait]
impl RetrievalStrategy for KeywordSearchStrategy {
    fn name(&self) -> &str {
        "keyword"
    }

    async fn retrieve(&self, query: &RetrievalQuery) -> Result<Vec<ContextChunk>, RetrievalError> {
        let page_size = self.config.keyword_page_size;
        let chunks = with_timeout_retry(
            || self.store.list_chunks(&query.owner_id, page_size),
            self.timeouts.keyword_search(),
            "keyword fetch",
        )
        .await
        .map_err(RetrievalError::from_store)?;

        let scorer = KeywordScorer::new(&query.question, &self.config);
        Ok(scorer.rank(&chunks, self.config.keyword_top_n))
    }
}

/// Query terms compiled into whole-word, case-insensitive patterns
pub struct KeywordScorer {
    terms: Vec<String>,
    patterns: Vec<Regex>,
    text_weight: f32,
    term_weight: f32,
}

impl KeywordScorer {
    pub fn new(question: &str, config: &RetrievalConfig) -> Self {
        let terms = extract_query_terms(question, config.min_term_len);
        let patterns = terms
            .iter()
            .filter_map(|t| Regex::new(&format!(r"(?i)\b{}\b", regex::escape(t))).ok())
            .collect();

        Self {
            terms,
            patterns,
            text_weight: config.text_match_weight,
            term_weight: config.term_match_weight,
        }
    }

    /// Weighted match count for one chunk
    pub fn score(&self, chunk: &ChunkRecord) -> f32 {
        let text_hits: usize = self
            .patterns
            .iter()
            .map(|p| p.find_iter(&chunk.text).count())
            .sum();

        let keyword_hits = self
            .terms
            .iter()
            .filter(|t| chunk.keywords.iter().any(|k| k.eq_ignore_ascii_case(t)))
            .count();

        self.text_weight * text_hits as f32 + self.term_weight * keyword_hits as f32
    }

    /// Highest-scoring chunks first, zero scores dropped, at most `top_n`
    pub fn rank(&self, chunks: &[ChunkRecord], top_n: usize) -> Vec<ContextChunk> {
        if self.terms.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(f32, &ChunkRecord)> = chunks
            .iter()
            .map(|c| (self.score(c), c))
            .filter(|(score, _)| *score > 0.0)
            .collect();

        // Stable sort keeps store order among equal scores
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));

        scored
            .into_iter()
            .take(top_n)
            .map(|(_, c)| c.to_context())
            .collect()
    }
}

/// Lowercased alphanumeric terms longer than `min_len` characters, deduplicated
pub fn extract_query_terms(question: &str, min_len: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    question
        .split(|c: char| !c.is_alphanumeric())
        .map(|t| t.to_lowercase())
        .filter(|t| t.chars().count() > min_len)
        .filter(|t| seen.insert(t.clone()))
        .collect()
}
