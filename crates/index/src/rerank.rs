//! Reranking of fused candidates.

use std::collections::BTreeSet;

use async_trait::async_trait;
use ctxpack_core::{RetrievalCandidate, RetrievalError, Reranker};

use crate::lexical::tokenize;

/// Bonus added when the whole query appears verbatim in the passage.
const PHRASE_BONUS: f64 = 0.25;

/// Scores a passage by the fraction of distinct query terms it contains,
/// plus [`PHRASE_BONUS`] for an exact (case-insensitive) phrase match.
#[derive(Debug, Clone, Copy, Default)]
pub struct TermOverlapReranker;

impl TermOverlapReranker {
    pub fn score_one(query: &str, passage: &str) -> f64 {
        let query_terms: BTreeSet<String> = tokenize(query).into_iter().collect();
        if query_terms.is_empty() {
            return 0.0;
        }
        let passage_terms: BTreeSet<String> = tokenize(passage).into_iter().collect();
        let hits = query_terms.intersection(&passage_terms).count();
        let mut score = hits as f64 / query_terms.len() as f64;

        let phrase = query.trim().to_lowercase();
        if query_terms.len() > 1 && passage.to_lowercase().contains(&phrase) {
            score += PHRASE_BONUS;
        }
        score
    }
}

#[async_trait]
impl Reranker for TermOverlapReranker {
    fn name(&self) -> &str {
        "term_overlap"
    }

    async fn score(&self, query: &str, passages: &[&str]) -> Result<Vec<f64>, RetrievalError> {
        Ok(passages
            .iter()
            .map(|passage| Self::score_one(query, passage))
            .collect())
    }
}

/// Attach rerank scores and reorder by them. Equal rerank scores keep the
/// incoming (fused) order.
pub fn apply_rerank(
    mut candidates: Vec<RetrievalCandidate>,
    scores: &[f64],
) -> Result<Vec<RetrievalCandidate>, RetrievalError> {
    if scores.len() != candidates.len() {
        return Err(RetrievalError::RerankFailed(format!(
            "reranker returned {} scores for {} candidates",
            scores.len(),
            candidates.len()
        )));
    }

    for (candidate, score) in candidates.iter_mut().zip(scores) {
        candidate.rerank_score = Some(*score);
    }
    // Stable sort preserves fused order among equals.
    candidates.sort_by(|a, b| {
        let a = a.rerank_score.unwrap_or(f64::NEG_INFINITY);
        let b = b.rerank_score.unwrap_or(f64::NEG_INFINITY);
        b.partial_cmp(&a).unwrap_or(std::cmp::Ordering::Equal)
    });
    Ok(candidates)
}
