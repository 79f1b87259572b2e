//! Application state for the memo RAG server

use axum::http::HeaderMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::config::RagConfig;
use crate::error::{Error, Result};
use crate::ingestion::MemoIngestor;
use crate::providers::{
    ChunkStore, CompletionProvider, EmbeddingProvider, OllamaProvider, SqliteChunkStore,
};
use crate::ratelimit::{RateLimitStore, RateLimiter, SqliteRateLimitStore};
use crate::retrieval::RetrievalEngine;
use crate::storage::MemoDb;
use crate::streaming::ChatStreamCoordinator;

/// Longest identity header value accepted
const MAX_IDENTITY_LEN: usize = 256;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// Configuration
    config: RagConfig,
    /// Persistent chunk store
    chunk_store: Arc<dyn ChunkStore>,
    /// Per-identity admission control
    rate_limiter: Arc<RateLimiter>,
    /// Periodic rate-limit sweep, aborted on drop
    cleanup_task: Mutex<Option<JoinHandle<()>>>,
    retrieval: RetrievalEngine,
    streaming: ChatStreamCoordinator,
    ingestor: MemoIngestor,
}

impl Drop for AppStateInner {
    fn drop(&mut self) {
        if let Some(handle) = self.cleanup_task.lock().take() {
            handle.abort();
        }
    }
}

impl AppState {
    /// Create application state backed by SQLite and Ollama
    pub async fn new(config: RagConfig) -> Result<Self> {
        tracing::info!("Initializing memo RAG application state...");

        let db = Arc::new(MemoDb::new(&config.storage.database_path)?);
        let chunk_store: Arc<dyn ChunkStore> = Arc::new(SqliteChunkStore::new(Arc::clone(&db)));
        let rate_store: Arc<dyn RateLimitStore> = Arc::new(SqliteRateLimitStore::new(db));

        let (embedder, chat) =
            OllamaProvider::new(&config.llm, config.embeddings.dimensions)?.split();
        tracing::info!(
            "Ollama providers initialized (embed: {}, chat: {})",
            config.llm.embed_model,
            config.llm.chat_model
        );

        Ok(Self::from_parts(
            config,
            chunk_store,
            Arc::new(embedder),
            Arc::new(chat),
            rate_store,
        ))
    }

    /// Assemble state from already-built collaborators
    ///
    /// Must be called inside a Tokio runtime: it spawns the rate-limit sweep.
    pub fn from_parts(
        config: RagConfig,
        chunk_store: Arc<dyn ChunkStore>,
        embedding_provider: Arc<dyn EmbeddingProvider>,
        completion_provider: Arc<dyn CompletionProvider>,
        rate_limit_store: Arc<dyn RateLimitStore>,
    ) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.clone(), rate_limit_store));
        let cleanup_task = if config.rate_limit.enabled {
            Some(rate_limiter.start_cleanup())
        } else {
            None
        };

        let retrieval = RetrievalEngine::new(
            Arc::clone(&chunk_store),
            Arc::clone(&embedding_provider),
            &config,
        );
        let streaming = ChatStreamCoordinator::new(
            Arc::clone(&completion_provider),
            config.timeouts.completion(),
        );
        let ingestor = MemoIngestor::new(
            &config.chunking,
            Arc::clone(&embedding_provider),
            Arc::clone(&chunk_store),
        );

        tracing::info!(
            "Application state ready (store: {}, embeddings: {}, completion: {} / {})",
            chunk_store.name(),
            embedding_provider.name(),
            completion_provider.name(),
            completion_provider.model()
        );

        Self {
            inner: Arc::new(AppStateInner {
                config,
                chunk_store,
                rate_limiter,
                cleanup_task: Mutex::new(cleanup_task),
                retrieval,
                streaming,
                ingestor,
            }),
        }
    }

    /// Get configuration
    pub fn config(&self) -> &RagConfig {
        &self.inner.config
    }

    pub fn chunk_store(&self) -> &Arc<dyn ChunkStore> {
        &self.inner.chunk_store
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.inner.rate_limiter
    }

    pub fn retrieval(&self) -> &RetrievalEngine {
        &self.inner.retrieval
    }

    pub fn streaming(&self) -> &ChatStreamCoordinator {
        &self.inner.streaming
    }

    pub fn ingestor(&self) -> &MemoIngestor {
        &self.inner.ingestor
    }

    /// Caller identity from the configured header
    pub fn identity(&self, headers: &HeaderMap) -> Result<String> {
        let name = self.inner.config.server.identity_header.as_str();
        let value = headers
            .get(name)
            .ok_or_else(|| Error::unauthorized(format!("missing {} header", name)))?;

        let identity = value
            .to_str()
            .map_err(|_| Error::unauthorized(format!("{} header is not valid text", name)))?
            .trim();

        if identity.is_empty() || identity.len() > MAX_IDENTITY_LEN {
            return Err(Error::unauthorized(format!("{} header is invalid", name)));
        }

        Ok(identity.to_string())
    }
}
