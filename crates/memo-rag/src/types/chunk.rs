//! Chunk records and their per-request projections

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A contiguous slice of a memo transcript, stored with its embedding
///
/// `(memo_id, chunk_index)` is unique within an owner's chunk set. Records are
/// written once by ingestion and only ever soft-deleted afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Identity that owns the memo
    pub owner_id: String,
    /// Source memo
    pub memo_id: String,
    /// Position within the memo
    pub chunk_index: u32,
    /// Transcript text
    pub text: String,
    /// Embedding vector
    pub embedding: Vec<f32>,
    /// Precomputed terms used by keyword scoring
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Inherited from the memo
    #[serde(default)]
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
}

impl ChunkRecord {
    /// Create a live chunk record stamped with the current time
    pub fn new(
        owner_id: impl Into<String>,
        memo_id: impl Into<String>,
        chunk_index: u32,
        text: impl Into<String>,
        embedding: Vec<f32>,
    ) -> Self {
        Self {
            owner_id: owner_id.into(),
            memo_id: memo_id.into(),
            chunk_index,
            text: text.into(),
            embedding,
            keywords: Vec::new(),
            deleted: false,
            created_at: Utc::now(),
        }
    }

    /// Attach the keyword list
    pub fn with_keywords(mut self, keywords: Vec<String>) -> Self {
        self.keywords = keywords;
        self
    }

    /// Project to prompt context (drops the embedding)
    pub fn to_context(&self) -> ContextChunk {
        ContextChunk {
            memo_id: self.memo_id.clone(),
            chunk_index: self.chunk_index,
            text: self.text.clone(),
        }
    }
}

/// A chunk scored against the current query; lives for one request
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub memo_id: String,
    pub chunk_index: u32,
    pub text: String,
    pub embedding: Vec<f32>,
    /// Similarity reported by the store
    pub score: f32,
}

impl Candidate {
    /// Project to prompt context (drops the embedding)
    pub fn into_context(self) -> ContextChunk {
        ContextChunk {
            memo_id: self.memo_id,
            chunk_index: self.chunk_index,
            text: self.text,
        }
    }
}

/// A chunk selected for the prompt
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextChunk {
    pub memo_id: String,
    pub chunk_index: u32,
    pub text: String,
}

impl ContextChunk {
    /// Deduplication key
    pub fn key(&self) -> (&str, u32) {
        (self.memo_id.as_str(), self.chunk_index)
    }
}
