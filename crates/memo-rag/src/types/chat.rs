//! Chat request types

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Maximum number of messages accepted in one request
pub const MAX_MESSAGES: usize = 100;

/// Maximum question length in characters
pub const MAX_QUESTION_CHARS: usize = 5_000;

/// Author of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One turn of the conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Body of `POST /api/chat`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
}

impl ChatRequest {
    /// Create a request holding a single user question
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage::user(question)],
        }
    }

    /// Validate the request and extract the question
    ///
    /// The question is the most recent `user` message, trimmed.
    pub fn question(&self) -> Result<String> {
        if self.messages.is_empty() {
            return Err(Error::validation("messages must not be empty"));
        }
        if self.messages.len() > MAX_MESSAGES {
            return Err(Error::validation(format!(
                "messages must contain at most {} items",
                MAX_MESSAGES
            )));
        }

        let question = self
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.trim())
            .ok_or_else(|| Error::validation("messages must include a user message"))?;

        let len = question.chars().count();
        if len == 0 {
            return Err(Error::validation("question must not be empty"));
        }
        if len > MAX_QUESTION_CHARS {
            return Err(Error::validation(format!(
                "question must be at most {} characters",
                MAX_QUESTION_CHARS
            )));
        }

        Ok(question.to_string())
    }
}
