//! Provider abstractions for embeddings, completions, and chunk storage
//!
//! The pipeline only sees these traits, so backends can be swapped (or mocked
//! in tests) without touching retrieval or streaming.

pub mod document_store;
pub mod embedding;
pub mod llm;
pub mod local;
pub mod ollama;

pub use document_store::ChunkStore;
pub use embedding::EmbeddingProvider;
pub use llm::{CompletionProvider, TokenStream};
pub use local::SqliteChunkStore;
pub use ollama::{OllamaChat, OllamaEmbedder, OllamaProvider};
