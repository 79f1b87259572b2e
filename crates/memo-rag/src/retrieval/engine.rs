//! Retrieval engine: existence probe, strategy ladder, deduplication

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::RagConfig;
use crate::providers::{ChunkStore, EmbeddingProvider};
use crate::resilience::with_timeout_retry;
use crate::types::ContextChunk;

use super::strategy::{
    KeywordSearchStrategy, RetrievalQuery, RetrievalStrategy, VectorSearchStrategy,
};

/// Produces the context set for a question
///
/// Never fails: every problem degrades to a later strategy or to an empty
/// context, and the answer is generated either way.
pub struct RetrievalEngine {
    store: Arc<dyn ChunkStore>,
    strategies: Vec<Box<dyn RetrievalStrategy>>,
    probe_timeout: Duration,
}

impl RetrievalEngine {
    /// Default ladder: vector search, then keyword fallback
    pub fn new(
        store: Arc<dyn ChunkStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: &RagConfig,
    ) -> Self {
        let strategies: Vec<Box<dyn RetrievalStrategy>> = vec![
            Box::new(VectorSearchStrategy::new(
                embedder,
                Arc::clone(&store),
                config.retrieval.clone(),
                config.timeouts.clone(),
            )),
            Box::new(KeywordSearchStrategy::new(
                Arc::clone(&store),
                config.retrieval.clone(),
                config.timeouts.clone(),
            )),
        ];

        Self::with_strategies(store, strategies, config.timeouts.probe())
    }

    /// Custom ladder, tried in order
    pub fn with_strategies(
        store: Arc<dyn ChunkStore>,
        strategies: Vec<Box<dyn RetrievalStrategy>>,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            store,
            strategies,
            probe_timeout,
        }
    }

    /// Ranked, deduplicated context for `question` from `owner_id`'s memos
    pub async fn retrieve(&self, owner_id: &str, question: &str) -> Vec<ContextChunk> {
        let start = Instant::now();

        let probe = with_timeout_retry(
            || self.store.has_chunks(owner_id),
            self.probe_timeout,
            "existence probe",
        )
        .await;

        let probe_failed = match probe {
            Ok(true) => false,
            Ok(false) => {
                tracing::debug!("No memos for {}, skipping retrieval", owner_id);
                return Vec::new();
            }
            Err(e) => {
                tracing::warn!("Existence probe failed, skipping vector search: {}", e);
                true
            }
        };

        let query = RetrievalQuery {
            owner_id: owner_id.to_string(),
            question: question.to_string(),
        };

        for strategy in &self.strategies {
            if probe_failed && strategy.requires_probe() {
                continue;
            }

            match strategy.retrieve(&query).await {
                Ok(context) => {
                    let context = dedupe_contexts(context);
                    tracing::info!(
                        "Retrieved {} chunks via {} in {}ms",
                        context.len(),
                        strategy.name(),
                        start.elapsed().as_millis()
                    );
                    return context;
                }
                Err(e) => {
                    tracing::warn!("{} retrieval failed, falling back: {}", strategy.name(), e);
                }
            }
        }

        tracing::warn!("All retrieval strategies failed, answering without context");
        Vec::new()
    }
}

/// Drop repeated `(memo_id, chunk_index)` pairs, keeping first occurrences in order
pub fn dedupe_contexts(items: Vec<ContextChunk>) -> Vec<ContextChunk> {
    let mut seen = HashSet::with_capacity(items.len());
    let first_seen: Vec<bool> = items.iter().map(|c| seen.insert(c.key())).collect();
    items
        .into_iter()
        .zip(first_seen)
        .filter_map(|(c, first)| first.then_some(c))
        .collect()
}
