//! Ollama HTTP client for embeddings and streamed chat, with retry logic

use bytes::Bytes;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::sleep;

use crate::config::LlmConfig;
use crate::error::{Error, Result};
use crate::providers::llm::TokenStream;

/// Ollama API client with automatic retry for non-streaming calls
pub struct OllamaClient {
    /// HTTP client
    client: Client,
    /// Configuration
    config: LlmConfig,
    /// Maximum retries
    max_retries: u32,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatTurn<'a>; 2],
    stream: bool,
    options: ChatOptions,
}

#[derive(Serialize)]
struct ChatTurn<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
}

/// One NDJSON line of a streamed `/api/chat` response
#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChatChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct ChatChunkMessage {
    #[serde(default)]
    content: String,
}

impl OllamaClient {
    /// Create a new Ollama client with retry support
    ///
    /// No overall request timeout is set on the HTTP client: chat responses are
    /// long-lived streams, and callers bound each call with their own deadline.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .pool_max_idle_per_host(5)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            max_retries: config.max_retries,
            config: config.clone(),
        })
    }

    /// Retry a request with exponential backoff
    async fn retry_request<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    last_error = Some(e);
                    if attempt < self.max_retries {
                        let delay = Duration::from_millis(250 * 2u64.pow(attempt));
                        tracing::warn!(
                            "Ollama request failed (attempt {}/{}), retrying in {:?}",
                            attempt + 1,
                            self.max_retries + 1,
                            delay
                        );
                        sleep(delay).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::unavailable("ollama", "unknown error")))
    }

    /// Check if Ollama is available
    pub async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/api/tags", self.config.base_url);

        match self.client.get(&url).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    /// Generate an embedding with retry
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.config.base_url);
        let model = self.config.embed_model.as_str();

        self.retry_request(|| {
            let url = url.as_str();
            async move {
                let response = self
                    .client
                    .post(url)
                    .json(&EmbedRequest { model, prompt: text })
                    .send()
                    .await
                    .map_err(|e| Error::unavailable("ollama", format!("embedding request failed: {}", e)))?;

                if !response.status().is_success() {
                    return Err(Error::unavailable(
                        "ollama",
                        format!("embedding failed: HTTP {}", response.status()),
                    ));
                }

                let embed_response: EmbedResponse = response.json().await.map_err(|e| {
                    Error::unavailable("ollama", format!("failed to parse embedding response: {}", e))
                })?;

                Ok(embed_response.embedding)
            }
        })
        .await
    }

    /// Start a streamed chat completion
    pub async fn chat_stream(&self, system_prompt: &str, user_prompt: &str) -> Result<TokenStream> {
        let url = format!("{}/api/chat", self.config.base_url);

        let request = ChatRequest {
            model: &self.config.chat_model,
            messages: [
                ChatTurn {
                    role: "system",
                    content: system_prompt,
                },
                ChatTurn {
                    role: "user",
                    content: user_prompt,
                },
            ],
            stream: true,
            options: ChatOptions {
                temperature: self.config.temperature,
            },
        };

        tracing::info!("Streaming answer with model: {}", self.config.chat_model);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::unavailable("ollama", format!("chat request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::unavailable(
                "ollama",
                format!("chat failed: HTTP {} - {}", status, body),
            ));
        }

        Ok(parse_ndjson_stream(response.bytes_stream()))
    }
}

type ByteStream = BoxStream<'static, std::result::Result<Bytes, reqwest::Error>>;

struct NdjsonState {
    bytes: ByteStream,
    buffer: Vec<u8>,
    pending: VecDeque<Result<String>>,
    finished: bool,
}

/// Turn an NDJSON byte stream into content increments
///
/// Lines may be split across network chunks, so bytes are buffered until a
/// newline arrives. Empty increments are skipped; the stream ends at the first
/// `done: true` line, an `error` line, or end of input.
pub fn parse_ndjson_stream<S>(bytes: S) -> TokenStream
where
    S: Stream<Item = std::result::Result<Bytes, reqwest::Error>> + Send + 'static,
{
    let state = NdjsonState {
        bytes: bytes.boxed(),
        buffer: Vec::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    state.buffer.extend_from_slice(&chunk);
                    while let Some(pos) = state.buffer.iter().position(|&b| b == b'\n') {
                        let line: Vec<u8> = state.buffer.drain(..=pos).collect();
                        push_line(&mut state, &line);
                        if state.finished {
                            break;
                        }
                    }
                }
                Some(Err(e)) => {
                    state.finished = true;
                    state
                        .pending
                        .push_back(Err(Error::unavailable("ollama", format!("stream error: {}", e))));
                }
                None => {
                    let rest = std::mem::take(&mut state.buffer);
                    push_line(&mut state, &rest);
                    state.finished = true;
                }
            }
        }
    })
    .boxed()
}

fn push_line(state: &mut NdjsonState, line: &[u8]) {
    let line = String::from_utf8_lossy(line);
    let line = line.trim();
    if line.is_empty() {
        return;
    }

    match serde_json::from_str::<ChatChunk>(line) {
        Ok(chunk) => {
            if let Some(error) = chunk.error {
                state.finished = true;
                state.pending.push_back(Err(Error::unavailable("ollama", error)));
                return;
            }
            if let Some(message) = chunk.message {
                if !message.content.is_empty() {
                    state.pending.push_back(Ok(message.content));
                }
            }
            if chunk.done {
                state.finished = true;
            }
        }
        Err(e) => {
            tracing::warn!("Skipping malformed stream line: {}", e);
        }
    }
}
