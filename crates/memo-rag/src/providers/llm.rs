//! Completion provider trait for streamed answer generation

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::Result;

/// Incremental text produced by a completion provider
///
/// Dropping the stream releases the underlying connection.
pub type TokenStream = BoxStream<'static, Result<String>>;

/// Trait for streaming chat completions
///
/// Implementations:
/// - `OllamaChat`: Local Ollama server (`/api/chat` with `stream: true`)
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Start a completion and return its token stream
    ///
    /// Errors returned here happen before any token is produced; errors
    /// inside the stream happen after.
    async fn stream_complete(&self, system_prompt: &str, user_prompt: &str) -> Result<TokenStream>;

    /// Check if the provider is healthy and available
    async fn health_check(&self) -> Result<bool>;

    /// Get provider name for logging
    fn name(&self) -> &str;

    /// Get the model being used
    fn model(&self) -> &str;
}
