//! Response types: citations, stream events, memo endpoints

use serde::{Deserialize, Serialize};

use super::chunk::ContextChunk;

/// Reference to the memo chunk that grounded part of an answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    pub memo_id: String,
    pub chunk_index: u32,
    pub text: String,
}

impl From<&ContextChunk> for Citation {
    fn from(context: &ContextChunk) -> Self {
        Self {
            memo_id: context.memo_id.clone(),
            chunk_index: context.chunk_index,
            text: context.text.clone(),
        }
    }
}

impl Citation {
    /// Format citation the way the model is asked to cite inline
    pub fn format_inline(&self) -> String {
        format!("[{}#{}]", self.memo_id, self.chunk_index)
    }
}

/// One data frame of the chat event stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    /// Always the first frame
    Citations { citations: Vec<Citation> },
    /// Verbatim text increment from the model
    Delta { delta: String },
    /// Normal completion; always the last frame
    Done,
    /// In-stream failure; always the last frame
    Error { error: String },
}

impl StreamEvent {
    /// True for `done` and `error`
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error { .. })
    }
}

/// Body of `POST /api/memos`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestMemoRequest {
    /// Generated when absent
    #[serde(default)]
    pub memo_id: Option<String>,
    pub transcript: String,
}

/// Result of ingesting one memo
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestMemoResponse {
    pub memo_id: String,
    pub chunks: usize,
}

/// Result of soft-deleting one memo
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteMemoResponse {
    pub memo_id: String,
    pub chunks_deleted: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_format() {
        let citations = StreamEvent::Citations {
            citations: vec![Citation {
                memo_id: "m1".to_string(),
                chunk_index: 3,
                text: "buy milk".to_string(),
            }],
        };
        assert_eq!(
            serde_json::to_string(&citations).unwrap(),
            r#"{"type":"citations","citations":[{"memoId":"m1","chunkIndex":3,"text":"buy milk"}]}"#
        );
        assert_eq!(
            serde_json::to_string(&StreamEvent::Delta { delta: "Hel".to_string() }).unwrap(),
            r#"{"type":"delta","delta":"Hel"}"#
        );
        assert_eq!(serde_json::to_string(&StreamEvent::Done).unwrap(), r#"{"type":"done"}"#);
        assert_eq!(
            serde_json::to_string(&StreamEvent::Error { error: "boom".to_string() }).unwrap(),
            r#"{"type":"error","error":"boom"}"#
        );
    }

    #[test]
    fn test_citation_from_context() {
        let context = ContextChunk {
            memo_id: "memo-7".to_string(),
            chunk_index: 2,
            text: "dentist on friday".to_string(),
        };
        let citation = Citation::from(&context);
        assert_eq!(citation.format_inline(), "[memo-7#2]");
        assert_eq!(citation.text, context.text);
    }
}
