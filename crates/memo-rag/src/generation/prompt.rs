//! Prompt templates for grounded answers over voice memos

use crate::types::{Citation, ContextChunk};

/// Instructions sent as the system message of every completion
pub const SYSTEM_PROMPT: &str = r#"You are an assistant that answers questions about the user's own voice memos.

GROUNDING RULES:
1. Use ONLY information stated in the memo excerpts provided with the question
2. If the excerpts do not contain the answer, say that you could not find it in the user's memos
3. Never invent memos, dates, names, or details that are not in the excerpts
4. Cite every claim inline using the excerpt label, for example [memo-123#2]
5. If several excerpts support a point, cite all of them

STYLE:
- Answer directly and concisely
- Quote short phrases from the memos when wording matters
- Use paragraphs or short lists when the answer covers several memos"#;

/// Prompt builder for memo questions
pub struct PromptBuilder;

impl PromptBuilder {
    /// Build the context section, one labelled block per chunk
    pub fn build_context(context: &[ContextChunk]) -> String {
        let mut out = String::new();

        for chunk in context {
            let label = Citation::from(chunk).format_inline();
            out.push_str(&format!(
                "{} (memo {}, part {})\n{}\n\n---\n\n",
                label,
                chunk.memo_id,
                chunk.chunk_index,
                chunk.text.trim()
            ));
        }

        out
    }

    /// Build the user message: context blocks followed by the question
    ///
    /// With no context the message says so explicitly, so the model answers
    /// that nothing relevant was found instead of guessing.
    pub fn build_user_prompt(question: &str, context: &[ContextChunk]) -> String {
        if context.is_empty() {
            return format!(
                "MEMO EXCERPTS:\nNo relevant notes were found in the user's memos.\n\nQUESTION: {}\n\nTell the user that their memos do not cover this.",
                question
            );
        }

        format!(
            "MEMO EXCERPTS:\n{}QUESTION: {}\n\nAnswer using only the excerpts above and cite them inline:",
            Self::build_context(context),
            question
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(memo: &str, index: u32, text: &str) -> ContextChunk {
        ContextChunk {
            memo_id: memo.to_string(),
            chunk_index: index,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_context_blocks_are_labelled() {
        let context = vec![
            chunk("m1", 0, "Buy oat milk"),
            chunk("m2", 3, "Dentist on Friday"),
        ];
        let prompt = PromptBuilder::build_user_prompt("What do I need to do?", &context);

        assert!(prompt.contains("[m1#0]"));
        assert!(prompt.contains("[m2#3]"));
        assert!(prompt.contains("Dentist on Friday"));
        assert!(prompt.ends_with("cite them inline:"));
        assert!(prompt.find("[m1#0]").unwrap() < prompt.find("[m2#3]").unwrap());
    }

    #[test]
    fn test_empty_context_is_explicit() {
        let prompt = PromptBuilder::build_user_prompt("Where did I park?", &[]);
        assert!(prompt.contains("No relevant notes were found"));
        assert!(prompt.contains("Where did I park?"));
    }

    #[test]
    fn test_system_prompt_describes_citation_format() {
        assert!(SYSTEM_PROMPT.contains("[memo-123#2]"));
    }
}
