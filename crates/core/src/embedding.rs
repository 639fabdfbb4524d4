//! Embedder trait — text to fixed-length vectors.
//!
//! Network clients for real embedding models live outside this workspace;
//! only the call contract matters here.

use async_trait::async_trait;

use crate::error::IndexError;

/// Produces embeddings of a fixed dimension.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Name of the model or scheme (for logs).
    fn name(&self) -> &str;

    /// Length of every vector this embedder returns.
    fn dimension(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, IndexError>;

    /// Embed several texts. Output order matches input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IndexError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }
}
