//! Local hashing embedder.
//!
//! Feature-hashes lowercase word terms into a fixed number of buckets and
//! L2-normalizes the result. No model, no network: useful for tests,
//! offline use, and as a stand-in until a real embedder is wired up.

use async_trait::async_trait;
use ctxpack_core::{Embedder, IndexError};
use sha2::{Digest, Sha256};

use crate::lexical::tokenize;
use crate::vector::normalize;

#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    /// Synchronous embedding; the trait method wraps this.
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for term in tokenize(text) {
            let digest = Sha256::digest(term.as_bytes());
            let mut bucket_bytes = [0u8; 8];
            bucket_bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bucket_bytes) % self.dimension as u64) as usize;
            // One digest bit picks the sign so collisions tend to cancel.
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        normalize(&mut vector);
        vector
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn name(&self) -> &str {
        "hashing"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, IndexError> {
        Ok(self.embed_text(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::cosine_similarity;

    #[test]
    fn deterministic_and_sized() {
        let embedder = HashingEmbedder::new(64);
        let a = embedder.embed_text("budget allocation");
        let b = embedder.embed_text("budget allocation");
        assert_eq!(a.len(), 64);
        assert_eq!(a, b);
    }

    #[test]
    fn case_insensitive_terms() {
        let embedder = HashingEmbedder::new(64);
        assert_eq!(
            embedder.embed_text("Budget Allocation"),
            embedder.embed_text("budget allocation")
        );
    }

    #[test]
    fn shared_terms_are_more_similar() {
        let embedder = HashingEmbedder::new(256);
        let query = embedder.embed_text("hybrid retrieval fusion");
        let close = embedder.embed_text("reciprocal rank fusion for hybrid retrieval");
        let far = embedder.embed_text("the weather is sunny today");
        assert!(cosine_similarity(&query, &close) > cosine_similarity(&query, &far));
    }

    #[test]
    fn empty_text_is_zero_vector() {
        let embedder = HashingEmbedder::new(8);
        assert!(embedder.embed_text("").iter().all(|x| *x == 0.0));
    }

    #[tokio::test]
    async fn trait_reports_dimension() {
        let embedder = HashingEmbedder::new(32);
        assert_eq!(Embedder::dimension(&embedder), 32);
        assert_eq!(embedder.embed("x").await.unwrap().len(), 32);
    }
}
