use exemplar_core::{QueryFilter, SearchHit};

use crate::schema::StoredChunk;

/// Cosine similarity in `[-1, 1]`; zero-norm vectors score `0.0`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}

/// Top-`k` matches by descending score; equal scores keep insertion order.
pub(crate) fn rank<'a>(
    chunks: impl Iterator<Item = &'a StoredChunk>,
    query: &[f32],
    k: usize,
    filter: &QueryFilter,
) -> Vec<SearchHit> {
    let mut scored: Vec<(f32, &StoredChunk)> = chunks
        .filter(|c| filter.matches(&c.record))
        .map(|c| (cosine_similarity(query, &c.record.embedding), c))
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.seq.cmp(&b.1.seq)));
    scored
        .into_iter()
        .take(k)
        .map(|(score, c)| SearchHit { record: c.record.clone(), score })
        .collect()
}
