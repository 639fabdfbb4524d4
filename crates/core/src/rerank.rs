//! Reranker trait — second-pass relevance scoring of retrieved passages.

use async_trait::async_trait;

use crate::error::RetrievalError;

/// Scores `(query, passage)` pairs. Higher is more relevant.
#[async_trait]
pub trait Reranker: Send + Sync {
    fn name(&self) -> &str;

    /// One score per passage, in input order.
    async fn score(&self, query: &str, passages: &[&str]) -> Result<Vec<f64>, RetrievalError>;
}
