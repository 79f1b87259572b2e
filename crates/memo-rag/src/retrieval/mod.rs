//! Retrieval: similarity math, strategies, and the engine that runs them

pub mod engine;
pub mod similarity;
pub mod strategy;

pub use engine::{dedupe_contexts, RetrievalEngine};
pub use similarity::{cosine_similarity, select_by_mmr};
pub use strategy::{
    KeywordScorer, KeywordSearchStrategy, RetrievalError, RetrievalQuery, RetrievalStrategy,
    VectorSearchStrategy,
};
