//! HybridRetriever — vector + BM25 search, fused with RRF, optionally reranked.
//!
//! Pipeline for one query:
//! 1. Vector and lexical search on the same snapshot, `candidate_pool_n` each
//! 2. Reciprocal Rank Fusion, keep the top `candidate_pool_n`
//! 3. Rerank `(query, chunk text)` pairs when enabled
//! 4. Keep the top `top_k`

use std::sync::Arc;
use std::time::Duration;

use ctxpack_config::ContextConfig;
use ctxpack_core::{
    ContextItem, Embedder, IndexError, Priority, Reranker, RetrievalCandidate, RetrievalError,
    SourceKind,
};
use tracing::{debug, warn};

use crate::fusion::reciprocal_rank_fusion;
use crate::index::{ChunkIndex, IndexSnapshot};
use crate::rerank::{TermOverlapReranker, apply_rerank};

/// Retrieval tunables, usually taken from [`ContextConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct RetrieverSettings {
    pub rrf_k: usize,
    pub rerank_enabled: bool,
    pub min_vector_score: Option<f32>,
    pub timeout: Duration,
}

impl Default for RetrieverSettings {
    fn default() -> Self {
        Self::from_config(&ContextConfig::default())
    }
}

impl RetrieverSettings {
    pub fn from_config(config: &ContextConfig) -> Self {
        Self {
            rrf_k: config.rrf_k,
            rerank_enabled: config.rerank_enabled,
            min_vector_score: config.min_vector_score,
            timeout: Duration::from_millis(config.retrieval_timeout_ms),
        }
    }
}

pub struct HybridRetriever {
    index: Arc<ChunkIndex>,
    embedder: Arc<dyn Embedder>,
    reranker: Arc<dyn Reranker>,
    settings: RetrieverSettings,
}

impl std::fmt::Debug for HybridRetriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridRetriever")
            .field("index", &self.index)
            .field("embedder", &self.embedder.name())
            .field("reranker", &self.reranker.name())
            .field("settings", &self.settings)
            .finish()
    }
}

impl HybridRetriever {
    /// Retriever over `index`. Reranking, when enabled, uses
    /// [`TermOverlapReranker`] unless another reranker is supplied.
    pub fn new(index: Arc<ChunkIndex>, settings: RetrieverSettings) -> Self {
        Self {
            embedder: Arc::clone(index.embedder()),
            index,
            reranker: Arc::new(TermOverlapReranker),
            settings,
        }
    }

    pub fn from_config(index: Arc<ChunkIndex>, config: &ContextConfig) -> Self {
        Self::new(index, RetrieverSettings::from_config(config))
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = reranker;
        self
    }

    /// Embed queries with `embedder` instead of the index's own embedder.
    /// It must produce vectors of the index dimension.
    pub fn with_query_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = embedder;
        self
    }

    pub fn index(&self) -> &Arc<ChunkIndex> {
        &self.index
    }

    pub fn settings(&self) -> &RetrieverSettings {
        &self.settings
    }

    /// Fused (and possibly reranked) candidates for a query.
    pub async fn retrieve(
        &self,
        query_text: &str,
        query_vector: &[f32],
        top_k: usize,
        candidate_pool_n: usize,
    ) -> Result<Vec<RetrievalCandidate>, RetrievalError> {
        let snapshot = self.index.snapshot();
        self.retrieve_in(&snapshot, query_text, query_vector, top_k, candidate_pool_n)
            .await
    }

    /// Like [`retrieve`](Self::retrieve), but returns context items built
    /// from the same snapshot the candidates came from.
    pub async fn retrieve_items(
        &self,
        query_text: &str,
        query_vector: &[f32],
        top_k: usize,
        candidate_pool_n: usize,
        priority: Priority,
    ) -> Result<Vec<ContextItem>, RetrievalError> {
        let snapshot = self.index.snapshot();
        let candidates = self
            .retrieve_in(&snapshot, query_text, query_vector, top_k, candidate_pool_n)
            .await?;
        Ok(to_context_items(&snapshot, &candidates, priority))
    }

    /// Embed `query_text` and retrieve, all under the configured retrieval
    /// timeout.
    pub async fn retrieve_for_query(
        &self,
        query_text: &str,
        top_k: usize,
        candidate_pool_n: usize,
        priority: Priority,
    ) -> Result<Vec<ContextItem>, RetrievalError> {
        let work = async {
            let query_vector = self
                .embedder
                .embed(query_text)
                .await
                .map_err(|e| RetrievalError::EmbeddingFailed(e.to_string()))?;
            self.retrieve_items(query_text, &query_vector, top_k, candidate_pool_n, priority)
                .await
        };

        match tokio::time::timeout(self.settings.timeout, work).await {
            Ok(result) => result,
            Err(_) => {
                let timeout_ms = self.settings.timeout.as_millis() as u64;
                warn!(timeout_ms, "Retrieval timed out");
                Err(RetrievalError::Timeout { timeout_ms })
            }
        }
    }

    async fn retrieve_in(
        &self,
        snapshot: &IndexSnapshot,
        query_text: &str,
        query_vector: &[f32],
        top_k: usize,
        candidate_pool_n: usize,
    ) -> Result<Vec<RetrievalCandidate>, RetrievalError> {
        if snapshot.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        // The pool bounds everything downstream; a larger top_k cannot widen it.
        let pool = candidate_pool_n;

        // A zero query vector carries no signal; skip that modality.
        let vector_ids: Vec<String> = if query_vector.iter().all(|x| *x == 0.0) {
            if query_vector.len() != snapshot.dimension() {
                return Err(IndexError::DimensionMismatch {
                    expected: snapshot.dimension(),
                    actual: query_vector.len(),
                }
                .into());
            }
            Vec::new()
        } else {
            snapshot
                .search_vector(query_vector, pool, self.settings.min_vector_score)?
                .into_iter()
                .map(|hit| hit.chunk_id)
                .collect()
        };
        let lexical_ids: Vec<String> = snapshot
            .search_lexical(query_text, pool)
            .into_iter()
            .map(|hit| hit.chunk_id)
            .collect();

        let mut candidates = reciprocal_rank_fusion(&vector_ids, &lexical_ids, self.settings.rrf_k);
        candidates.truncate(pool);

        if self.settings.rerank_enabled && !candidates.is_empty() {
            let passages: Vec<&str> = candidates
                .iter()
                .map(|c| snapshot.get_chunk(&c.chunk_id).map_or("", |chunk| chunk.text.as_str()))
                .collect();
            let scores = self.reranker.score(query_text, &passages).await?;
            candidates = apply_rerank(candidates, &scores)?;
        }
        candidates.truncate(top_k);

        debug!(
            generation = snapshot.generation(),
            vector_hits = vector_ids.len(),
            lexical_hits = lexical_ids.len(),
            returned = candidates.len(),
            reranked = self.settings.rerank_enabled,
            "Hybrid retrieval complete"
        );
        Ok(candidates)
    }
}

/// One `rag` item per candidate: content is the chunk text, cost is the
/// chunk's token count, citation is the chunk id.
pub fn to_context_items(
    snapshot: &IndexSnapshot,
    candidates: &[RetrievalCandidate],
    priority: Priority,
) -> Vec<ContextItem> {
    candidates
        .iter()
        .filter_map(|candidate| {
            let chunk = snapshot.get_chunk(&candidate.chunk_id)?;
            Some(
                ContextItem::new(
                    format!("{}#{}", chunk.source_doc_id, chunk.chunk_index),
                    chunk.text.clone(),
                    SourceKind::Rag,
                    priority,
                    chunk.token_count,
                )
                .with_citation(chunk.chunk_id.clone()),
            )
        })
        .collect()
}
