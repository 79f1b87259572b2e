//! Cosine similarity and Maximal Marginal Relevance selection
//!
//! MMR trades relevance against redundancy:
//! `score = λ × sim(candidate, query) − (1 − λ) × max sim(candidate, selected)`
//!
//! λ = 1.0 is pure relevance, λ = 0.0 pure diversity.

use crate::types::{Candidate, ContextChunk};

/// Default MMR balance
pub const DEFAULT_LAMBDA: f32 = 0.5;

/// Euclidean norm
fn magnitude(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Cosine similarity between two vectors
///
/// Returns 0.0 when the lengths differ or either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mag_a = magnitude(a);
    let mag_b = magnitude(b);
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    dot / (mag_a * mag_b)
}

/// Select up to `k` candidates by Maximal Marginal Relevance
///
/// Pools of `k` or fewer are returned whole, in their original order. Otherwise
/// the most query-similar candidate seeds the selection and each further pick
/// maximizes the MMR score; the first candidate in pool order wins ties.
///
/// Each remaining candidate keeps a running max similarity to the selected
/// set, so a round only compares against the newest pick: O(k·n) comparisons.
/// Embeddings are dropped from the output.
pub fn select_by_mmr(
    candidates: Vec<Candidate>,
    query: &[f32],
    k: usize,
    lambda: f32,
) -> Vec<ContextChunk> {
    if candidates.len() <= k {
        return candidates.into_iter().map(Candidate::into_context).collect();
    }
    if k == 0 {
        return Vec::new();
    }

    let relevance: Vec<f32> = candidates
        .iter()
        .map(|c| cosine_similarity(&c.embedding, query))
        .collect();

    let mut remaining: Vec<usize> = (0..candidates.len()).collect();
    let mut max_sim = vec![f32::NEG_INFINITY; candidates.len()];
    let mut selected: Vec<usize> = Vec::with_capacity(k);

    // Seed: highest relevance, first wins ties
    let mut seed_pos = 0;
    for (pos, &idx) in remaining.iter().enumerate() {
        if relevance[idx] > relevance[remaining[seed_pos]] {
            seed_pos = pos;
        }
    }
    selected.push(remaining.remove(seed_pos));

    while selected.len() < k && !remaining.is_empty() {
        let newest = &candidates[selected[selected.len() - 1]].embedding;

        let mut best_pos = 0;
        let mut best_score = f32::NEG_INFINITY;
        for (pos, &idx) in remaining.iter().enumerate() {
            let sim = cosine_similarity(&candidates[idx].embedding, newest);
            if sim > max_sim[idx] {
                max_sim[idx] = sim;
            }

            let score = lambda * relevance[idx] - (1.0 - lambda) * max_sim[idx];
            if score > best_score {
                best_score = score;
                best_pos = pos;
            }
        }

        selected.push(remaining.remove(best_pos));
    }

    let mut slots: Vec<Option<Candidate>> = candidates.into_iter().map(Some).collect();
    selected
        .into_iter()
        .filter_map(|idx| slots[idx].take())
        .map(Candidate::into_context)
        .collect()
}
