//! Core types for the memo RAG service

pub mod chat;
pub mod chunk;
pub mod response;

pub use chat::{ChatMessage, ChatRequest, Role};
pub use chunk::{Candidate, ChunkRecord, ContextChunk};
pub use response::{
    Citation, DeleteMemoResponse, IngestMemoRequest, IngestMemoResponse, StreamEvent,
};
