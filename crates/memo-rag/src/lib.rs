//! memo-rag: cited, streamed answers over a user's voice memos
//!
//! A question is admitted by a per-identity rate limiter, grounded in the
//! user's memo chunks by a retrieval ladder (vector search with MMR, then
//! keyword scoring), and answered as a server-sent event stream that starts
//! with citations and ends with exactly one `done` or `error` frame.

pub mod config;
pub mod error;
pub mod generation;
pub mod ingestion;
pub mod providers;
pub mod ratelimit;
pub mod resilience;
pub mod retrieval;
pub mod server;
pub mod storage;
pub mod streaming;
pub mod types;

pub use config::RagConfig;
pub use error::{Error, Result};
pub use types::{ChatRequest, Citation, ContextChunk, StreamEvent};
