//! Transcript chunking with sentence-aware overlap and keyword extraction

use std::collections::HashMap;
use unicode_segmentation::UnicodeSegmentation;

use crate::config::ChunkingConfig;

/// Words too common to help keyword matching
const STOP_WORDS: &[&str] = &[
    "about", "after", "again", "all", "also", "and", "any", "are", "because", "been", "before",
    "but", "can", "could", "did", "does", "doing", "don", "for", "from", "gonna", "had", "has",
    "have", "her", "here", "him", "his", "how", "into", "its", "just", "like", "maybe", "more",
    "need", "not", "now", "okay", "our", "out", "really", "should", "some", "that", "the",
    "their", "them", "then", "there", "these", "they", "thing", "things", "think", "this",
    "those", "um", "uh", "very", "want", "was", "were", "what", "when", "where", "which", "who",
    "will", "with", "would", "yeah", "you", "your",
];

/// One chunk of a transcript, before embedding
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptChunk {
    pub index: u32,
    pub text: String,
    pub keywords: Vec<String>,
}

/// Transcript chunker with configurable size and overlap
pub struct TranscriptChunker {
    /// Target chunk size in characters
    chunk_size: usize,
    /// Overlap between chunks
    overlap: usize,
    /// Hard cap on chunk length
    max_chars: usize,
    keywords_per_chunk: usize,
}

impl TranscriptChunker {
    /// Create a new chunker
    pub fn new(config: &ChunkingConfig) -> Self {
        Self {
            chunk_size: config.chunk_size.max(1),
            overlap: config.overlap,
            max_chars: config.max_chunk_chars.max(1),
            keywords_per_chunk: config.keywords_per_chunk,
        }
    }

    /// Split a transcript into indexed chunks
    ///
    /// Chunks break on sentence boundaries where possible and start with the
    /// tail of the previous chunk. Transcripts without punctuation fall back
    /// to word boundaries.
    pub fn chunk(&self, transcript: &str) -> Vec<TranscriptChunk> {
        let mut texts = Vec::new();
        let mut current = String::new();
        // Whether `current` holds anything beyond the carried-over overlap
        let mut has_new = false;

        for piece in self.split_into_pieces(transcript) {
            if has_new && current.len() + piece.len() > self.chunk_size {
                texts.push(current.trim().to_string());
                current = self.get_overlap_text(&current);
                has_new = false;
            }
            current.push_str(piece);
            has_new |= !piece.trim().is_empty();
        }

        if has_new {
            texts.push(current.trim().to_string());
        }

        texts
            .into_iter()
            .map(|t| truncate_chars(&t, self.max_chars))
            .enumerate()
            .map(|(i, text)| TranscriptChunk {
                index: i as u32,
                keywords: extract_keywords(&text, self.keywords_per_chunk),
                text,
            })
            .collect()
    }

    /// Sentences, with any sentence longer than a chunk split into words
    fn split_into_pieces<'a>(&self, text: &'a str) -> Vec<&'a str> {
        let mut pieces = Vec::new();
        for sentence in text.split_sentence_bounds() {
            if sentence.len() > self.chunk_size {
                pieces.extend(sentence.split_word_bounds());
            } else {
                pieces.push(sentence);
            }
        }
        pieces
    }

    /// Get overlap text from the end of a chunk
    fn get_overlap_text(&self, text: &str) -> String {
        if self.overlap == 0 {
            return String::new();
        }
        if text.len() <= self.overlap {
            return text.to_string();
        }

        let mut start = text.len().saturating_sub(self.overlap);
        while start > 0 && !text.is_char_boundary(start) {
            start -= 1;
        }

        let overlap_text = &text[start..];

        // Prefer a sentence start, then a word start
        if let Some(pos) = overlap_text.find(". ") {
            return overlap_text[pos + 2..].to_string();
        }
        if let Some(pos) = overlap_text.find(' ') {
            return overlap_text[pos + 1..].to_string();
        }

        overlap_text.to_string()
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}

/// Most frequent non-stop-words of `text`, lowercased
///
/// Ties keep first-occurrence order.
pub fn extract_keywords(text: &str, limit: usize) -> Vec<String> {
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();

    for (position, word) in text.unicode_words().enumerate() {
        let word = word.to_lowercase();
        if word.chars().count() <= 2
            || word.chars().all(|c| c.is_numeric())
            || STOP_WORDS.contains(&word.as_str())
        {
            continue;
        }
        counts.entry(word).or_insert((0, position)).0 += 1;
    }

    let mut ranked: Vec<(String, (usize, usize))> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.1 .1.cmp(&b.1 .1)));
    ranked.into_iter().take(limit).map(|(word, _)| word).collect()
}
