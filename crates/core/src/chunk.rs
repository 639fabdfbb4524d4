//! Indexed document chunks and per-query retrieval candidates.

use serde::{Deserialize, Serialize};

/// A contiguous slice of a source document, stored in the chunk index.
///
/// Chunks are immutable once created. Re-indexing a document produces a
/// new set of chunks under a new revision instead of mutating these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    /// `"{doc_id}:{revision}:{chunk_index}"`
    pub chunk_id: String,

    pub source_doc_id: String,

    /// Position of this chunk within its document (0-based).
    pub chunk_index: usize,

    pub text: String,

    /// Embedding of `text`; length equals the index dimension.
    pub vector: Vec<f32>,

    pub token_count: usize,

    /// Byte offset of `text` in the source document.
    pub start: usize,

    /// Byte offset one past the end of `text`.
    pub end: usize,

    /// Leading bytes of `text` repeated from the previous chunk.
    #[serde(default)]
    pub overlap_len: usize,
}

impl DocumentChunk {
    /// The part of `text` that is not repeated from the previous chunk.
    pub fn fresh_text(&self) -> &str {
        self.text.get(self.overlap_len..).unwrap_or("")
    }
}

/// How vector similarity is scored. Fixed per index instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMetric {
    #[default]
    Cosine,
    InnerProduct,
}

impl std::fmt::Display for SimilarityMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cosine => f.write_str("cosine"),
            Self::InnerProduct => f.write_str("inner_product"),
        }
    }
}

/// One fused (and possibly reranked) retrieval result.
///
/// Ephemeral: built per query and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalCandidate {
    pub chunk_id: String,

    /// 1-based rank in the vector list, if present there.
    pub vector_rank: Option<usize>,

    /// 1-based rank in the lexical list, if present there.
    pub lexical_rank: Option<usize>,

    pub fused_score: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f64>,
}

impl RetrievalCandidate {
    /// The better (lower) of the two ranks, used as a fusion tie-breaker.
    pub fn best_rank(&self) -> usize {
        match (self.vector_rank, self.lexical_rank) {
            (Some(v), Some(l)) => v.min(l),
            (Some(v), None) => v,
            (None, Some(l)) => l,
            (None, None) => usize::MAX,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(text: &str, overlap_len: usize) -> DocumentChunk {
        DocumentChunk {
            chunk_id: "doc:1:0".into(),
            source_doc_id: "doc".into(),
            chunk_index: 0,
            text: text.into(),
            vector: vec![0.0; 4],
            token_count: 1,
            start: 0,
            end: text.len(),
            overlap_len,
        }
    }

    #[test]
    fn fresh_text_skips_overlap() {
        assert_eq!(chunk("shared tail. New text", 13).fresh_text(), "New text");
        assert_eq!(chunk("abc", 0).fresh_text(), "abc");
    }

    #[test]
    fn best_rank_prefers_lower() {
        let c = RetrievalCandidate {
            chunk_id: "a".into(),
            vector_rank: Some(3),
            lexical_rank: Some(1),
            fused_score: 0.0,
            rerank_score: None,
        };
        assert_eq!(c.best_rank(), 1);

        let only_vector = RetrievalCandidate {
            lexical_rank: None,
            ..c.clone()
        };
        assert_eq!(only_vector.best_rank(), 3);
    }
}
