//! Reciprocal Rank Fusion (RRF) — merge the vector and lexical rankings.
//!
//! Each chunk's fused score is `Σ 1 / (k + rank)` over the lists that
//! contain it, with 1-based ranks. The constant `k` damps the weight of
//! top ranks; the usual value is 60.

use std::collections::HashMap;

use ctxpack_core::RetrievalCandidate;

/// Fuse two ranked lists of chunk ids.
///
/// Output is deduplicated and sorted by descending fused score; ties go to
/// the better (lower) of the two ranks, then to the chunk id.
pub fn reciprocal_rank_fusion(
    vector_ranked: &[String],
    lexical_ranked: &[String],
    k: usize,
) -> Vec<RetrievalCandidate> {
    let k = k as f64;
    let mut fused: HashMap<&str, RetrievalCandidate> = HashMap::new();

    for (i, chunk_id) in vector_ranked.iter().enumerate() {
        let rank = i + 1;
        let candidate = fused
            .entry(chunk_id.as_str())
            .or_insert_with(|| empty_candidate(chunk_id));
        // First occurrence wins if a list repeats an id.
        if candidate.vector_rank.is_none() {
            candidate.vector_rank = Some(rank);
            candidate.fused_score += 1.0 / (k + rank as f64);
        }
    }

    for (i, chunk_id) in lexical_ranked.iter().enumerate() {
        let rank = i + 1;
        let candidate = fused
            .entry(chunk_id.as_str())
            .or_insert_with(|| empty_candidate(chunk_id));
        if candidate.lexical_rank.is_none() {
            candidate.lexical_rank = Some(rank);
            candidate.fused_score += 1.0 / (k + rank as f64);
        }
    }

    let mut results: Vec<RetrievalCandidate> = fused.into_values().collect();
    results.sort_by(|a, b| {
        b.fused_score
            .partial_cmp(&a.fused_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.best_rank().cmp(&b.best_rank()))
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    results
}

fn empty_candidate(chunk_id: &str) -> RetrievalCandidate {
    RetrievalCandidate {
        chunk_id: chunk_id.to_string(),
        vector_rank: None,
        lexical_rank: None,
        fused_score: 0.0,
        rerank_score: None,
    }
}
