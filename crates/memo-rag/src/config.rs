//! Configuration for the memo RAG service

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Environment variable naming a TOML config file
pub const CONFIG_PATH_ENV: &str = "MEMO_RAG_CONFIG";

/// Longest accepted rate-limit window (one week)
pub const MAX_RATE_LIMIT_WINDOW_MS: u64 = 7 * 24 * 60 * 60 * 1000;

/// Main service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    /// Server configuration
    pub server: ServerConfig,
    /// Ollama configuration (embeddings + chat)
    pub llm: LlmConfig,
    /// Embedding configuration
    pub embeddings: EmbeddingConfig,
    /// Retrieval tuning
    pub retrieval: RetrievalConfig,
    /// Per-collaborator deadlines
    pub timeouts: TimeoutConfig,
    /// Admission control
    pub rate_limit: RateLimitConfig,
    /// Streaming response settings
    pub streaming: StreamingConfig,
    /// Transcript chunking
    pub chunking: ChunkingConfig,
    /// Persistent storage
    pub storage: StorageConfig,
}

impl RagConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: RagConfig = toml::from_str(&raw).map_err(|e| {
            Error::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        Ok(config)
    }

    /// Load configuration from `MEMO_RAG_CONFIG` (or defaults), then apply
    /// environment overrides and validate
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.trim().is_empty() => {
                tracing::info!("Loading configuration from {}", path);
                Self::from_file(path)?
            }
            _ => Self::default(),
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `MEMO_RAG_HOST`, `MEMO_RAG_PORT`, and `OLLAMA_BASE_URL`
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(host) = std::env::var("MEMO_RAG_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("MEMO_RAG_PORT") {
            self.server.port = port
                .parse()
                .map_err(|e| Error::Config(format!("Invalid MEMO_RAG_PORT '{}': {}", port, e)))?;
        }
        if let Ok(url) = std::env::var("OLLAMA_BASE_URL") {
            self.llm.base_url = url;
        }
        Ok(())
    }

    /// Reject settings that would make the pipeline misbehave
    pub fn validate(&self) -> Result<()> {
        if self.rate_limit.window_ms == 0 {
            return Err(Error::Config("rate_limit.window_ms must be > 0".to_string()));
        }
        if self.rate_limit.window_ms > MAX_RATE_LIMIT_WINDOW_MS {
            return Err(Error::Config(format!(
                "rate_limit.window_ms must be at most {}",
                MAX_RATE_LIMIT_WINDOW_MS
            )));
        }
        if self.rate_limit.max_requests == 0 {
            return Err(Error::Config("rate_limit.max_requests must be > 0".to_string()));
        }
        if !(0.0..=1.0).contains(&self.retrieval.mmr_lambda) {
            return Err(Error::Config(format!(
                "retrieval.mmr_lambda must be within [0, 1], got {}",
                self.retrieval.mmr_lambda
            )));
        }
        if self.retrieval.context_size == 0 {
            return Err(Error::Config("retrieval.context_size must be > 0".to_string()));
        }
        let t = &self.timeouts;
        if [t.probe_ms, t.embedding_ms, t.vector_search_ms, t.keyword_search_ms, t.completion_ms]
            .contains(&0)
        {
            return Err(Error::Config("timeouts must all be > 0".to_string()));
        }
        if self.chunking.overlap >= self.chunking.chunk_size {
            return Err(Error::Config(
                "chunking.overlap must be smaller than chunking.chunk_size".to_string(),
            ));
        }
        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address
    pub host: String,
    /// Port number
    pub port: u16,
    /// Enable CORS
    pub enable_cors: bool,
    /// Header carrying the caller identity
    pub identity_header: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            enable_cors: true,
            identity_header: "x-user-id".to_string(),
        }
    }
}

/// LLM (Ollama) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Ollama base URL
    pub base_url: String,
    /// Embedding model name
    pub embed_model: String,
    /// Chat model name
    pub chat_model: String,
    /// Temperature for generation
    pub temperature: f32,
    /// Connect timeout for the HTTP client in seconds
    pub connect_timeout_secs: u64,
    /// Number of retries for failed non-streaming requests
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            embed_model: "mxbai-embed-large".to_string(),
            chat_model: "llama3.2:3b".to_string(),
            temperature: 0.3,
            connect_timeout_secs: 10,
            max_retries: 1,
        }
    }
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Embedding dimensions (1024 for mxbai-embed-large)
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self { dimensions: 1024 }
    }
}

/// Retrieval tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Nearest neighbours fetched before MMR
    pub candidate_pool: usize,
    /// Context items handed to the prompt
    pub context_size: usize,
    /// MMR balance: 1.0 = pure relevance, 0.0 = pure diversity
    pub mmr_lambda: f32,
    /// Chunks fetched for keyword scoring
    pub keyword_page_size: usize,
    /// Keyword results kept
    pub keyword_top_n: usize,
    /// Weight of a whole-word match in chunk text
    pub text_match_weight: f32,
    /// Weight of a match against the chunk's keyword list
    pub term_match_weight: f32,
    /// Query terms must be longer than this many characters
    pub min_term_len: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            candidate_pool: 20,
            context_size: 12,
            mmr_lambda: 0.5,
            keyword_page_size: 50,
            keyword_top_n: 12,
            text_match_weight: 2.0,
            term_match_weight: 1.0,
            min_term_len: 2,
        }
    }
}

/// Deadlines for each collaborator call, in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub probe_ms: u64,
    pub embedding_ms: u64,
    pub vector_search_ms: u64,
    pub keyword_search_ms: u64,
    /// Covers opening the token stream and the whole stream after it
    pub completion_ms: u64,
}

impl TimeoutConfig {
    pub fn probe(&self) -> Duration {
        Duration::from_millis(self.probe_ms)
    }

    pub fn embedding(&self) -> Duration {
        Duration::from_millis(self.embedding_ms)
    }

    pub fn vector_search(&self) -> Duration {
        Duration::from_millis(self.vector_search_ms)
    }

    pub fn keyword_search(&self) -> Duration {
        Duration::from_millis(self.keyword_search_ms)
    }

    pub fn completion(&self) -> Duration {
        Duration::from_millis(self.completion_ms)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            probe_ms: 3_000,
            embedding_ms: 8_000,
            vector_search_ms: 5_000,
            keyword_search_ms: 5_000,
            completion_ms: 120_000,
        }
    }
}

/// Admission control configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Disable to admit every request
    pub enabled: bool,
    /// Window length in milliseconds
    pub window_ms: u64,
    /// Requests allowed per identity per window
    pub max_requests: u32,
    /// Maximum store entries deleted per cleanup sweep
    pub cleanup_batch_size: usize,
}

impl RateLimitConfig {
    /// Sweeps run every five windows
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.window_ms.min(MAX_RATE_LIMIT_WINDOW_MS).saturating_mul(5))
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_ms: 60_000,
            max_requests: 30,
            cleanup_batch_size: 100,
        }
    }
}

/// Streaming response configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Silence before a keep-alive comment frame is sent
    pub keep_alive_secs: u64,
}

impl StreamingConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self { keep_alive_secs: 15 }
    }
}

/// Transcript chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Target chunk size in characters
    pub chunk_size: usize,
    /// Overlap between consecutive chunks in characters
    pub overlap: usize,
    /// Hard cap on stored chunk text
    pub max_chunk_chars: usize,
    /// Keywords stored per chunk
    pub keywords_per_chunk: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 800,
            overlap: 150,
            max_chunk_chars: 2_000,
            keywords_per_chunk: 8,
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database holding chunks and rate-limit counters
    pub database_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let database_path = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("memo-rag")
            .join("memo-rag.db");

        Self { database_path }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = RagConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.rate_limit.window_ms, 60_000);
        assert_eq!(config.rate_limit.max_requests, 30);
        assert_eq!(config.retrieval.candidate_pool, 20);
        assert_eq!(config.retrieval.context_size, 12);
        assert_eq!(config.streaming.keep_alive_secs, 15);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: RagConfig = toml::from_str(
            r#"
            [rate_limit]
            max_requests = 5

            [retrieval]
            mmr_lambda = 0.7
            "#,
        )
        .unwrap();

        assert_eq!(config.rate_limit.max_requests, 5);
        assert_eq!(config.rate_limit.window_ms, 60_000);
        assert!((config.retrieval.mmr_lambda - 0.7).abs() < f32::EPSILON);
        assert_eq!(config.retrieval.keyword_page_size, 50);
    }

    #[test]
    fn test_validate_rejects_bad_lambda() {
        let mut config = RagConfig::default();
        config.retrieval.mmr_lambda = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_window() {
        let mut config = RagConfig::default();
        config.rate_limit.window_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_caps_window() {
        let mut config = RagConfig::default();
        config.rate_limit.window_ms = MAX_RATE_LIMIT_WINDOW_MS;
        assert!(config.validate().is_ok());
        config.rate_limit.window_ms = u64::MAX;
        assert!(config.validate().is_err());
    }
}
