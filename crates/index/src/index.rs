//! ChunkIndex — chunk storage with vector and lexical search.
//!
//! ## Concurrency
//!
//! The index is a sequence of immutable generations ([`IndexSnapshot`]).
//! Readers clone the current `Arc<IndexSnapshot>` and search it without
//! holding any lock. A single writer (serialized by an async mutex) builds
//! the next generation off to the side and publishes it with one pointer
//! swap, so readers observe either the old or the new generation in full.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use ctxpack_config::ContextConfig;
use ctxpack_core::{DocumentChunk, Embedder, IndexError, SimilarityMetric, TokenCounter};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::chunker::Chunker;
use crate::lexical::LexicalIndex;
use crate::vector::rank_by_similarity;

/// Bookkeeping for one indexed document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub doc_id: String,
    /// Bumped each time the document's content changes.
    pub revision: u64,
    /// Hex SHA-256 of the document text.
    pub content_hash: String,
    pub chunk_ids: Vec<String>,
    pub indexed_at: DateTime<Utc>,
}

/// A search hit: chunk id and its score under the search's scoring rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk_id: String,
    pub score: f64,
}

/// One immutable generation of the index.
#[derive(Debug, Clone)]
pub struct IndexSnapshot {
    generation: u64,
    dimension: usize,
    metric: SimilarityMetric,
    /// Chunks in insertion order; a chunk's position is its slot.
    chunks: Vec<Arc<DocumentChunk>>,
    slots: HashMap<String, usize>,
    documents: BTreeMap<String, DocumentRecord>,
    lexical: LexicalIndex,
}

impl IndexSnapshot {
    pub fn empty(dimension: usize, metric: SimilarityMetric) -> Self {
        Self {
            generation: 0,
            dimension,
            metric,
            chunks: Vec::new(),
            slots: HashMap::new(),
            documents: BTreeMap::new(),
            lexical: LexicalIndex::new(),
        }
    }

    /// Assemble a snapshot from stored parts, rebuilding lookups and the
    /// lexical postings.
    pub(crate) fn from_parts(
        generation: u64,
        dimension: usize,
        metric: SimilarityMetric,
        chunks: Vec<DocumentChunk>,
        documents: BTreeMap<String, DocumentRecord>,
    ) -> Self {
        let mut snapshot = Self::empty(dimension, metric);
        snapshot.generation = generation;
        snapshot.documents = documents;
        for chunk in chunks {
            snapshot.push_chunk(chunk);
        }
        snapshot
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn metric(&self) -> SimilarityMetric {
        self.metric
    }

    /// Number of chunks.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    pub fn document(&self, doc_id: &str) -> Option<&DocumentRecord> {
        self.documents.get(doc_id)
    }

    pub fn documents(&self) -> impl Iterator<Item = &DocumentRecord> {
        self.documents.values()
    }

    pub fn chunks(&self) -> impl Iterator<Item = &Arc<DocumentChunk>> {
        self.chunks.iter()
    }

    pub fn get_chunk(&self, chunk_id: &str) -> Option<&Arc<DocumentChunk>> {
        self.slots.get(chunk_id).map(|&slot| &self.chunks[slot])
    }

    /// Rank chunks by vector similarity. Ties keep insertion order.
    pub fn search_vector(
        &self,
        query_vector: &[f32],
        top_n: usize,
        min_score: Option<f32>,
    ) -> Result<Vec<ScoredChunk>, IndexError> {
        if query_vector.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: query_vector.len(),
            });
        }

        let ranked = rank_by_similarity(
            self.chunks.iter().map(|c| c.vector.as_slice()),
            query_vector,
            self.metric,
            top_n,
            min_score,
        );
        Ok(ranked
            .into_iter()
            .map(|(slot, score)| ScoredChunk {
                chunk_id: self.chunks[slot].chunk_id.clone(),
                score: score as f64,
            })
            .collect())
    }

    /// Rank chunks by BM25. Ties keep insertion order.
    pub fn search_lexical(&self, query_text: &str, top_n: usize) -> Vec<ScoredChunk> {
        self.lexical
            .search(query_text, top_n)
            .into_iter()
            .map(|(slot, score)| ScoredChunk {
                chunk_id: self.chunks[slot].chunk_id.clone(),
                score,
            })
            .collect()
    }

    fn push_chunk(&mut self, chunk: DocumentChunk) {
        let slot = self.lexical.add(&chunk.text);
        self.slots.insert(chunk.chunk_id.clone(), slot);
        self.chunks.push(Arc::new(chunk));
    }

    /// Drop a document's chunks and rebuild slot-based structures.
    fn remove_chunks_of(&mut self, doc_id: &str) {
        self.chunks.retain(|c| c.source_doc_id != doc_id);
        self.slots = self
            .chunks
            .iter()
            .enumerate()
            .map(|(slot, c)| (c.chunk_id.clone(), slot))
            .collect();
        self.lexical = LexicalIndex::from_texts(self.chunks.iter().map(|c| c.text.as_str()));
    }
}

/// Hex SHA-256 of a document's text.
pub fn content_hash(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

/// Incrementally updatable chunk index with lock-free reads.
pub struct ChunkIndex {
    current: ArcSwap<IndexSnapshot>,
    /// Serializes writers: document updates and saves.
    pub(crate) writer: tokio::sync::Mutex<()>,
    chunker: Chunker,
    embedder: Arc<dyn Embedder>,
}

impl std::fmt::Debug for ChunkIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("ChunkIndex")
            .field("generation", &snapshot.generation())
            .field("chunks", &snapshot.len())
            .field("documents", &snapshot.document_count())
            .field("embedder", &self.embedder.name())
            .field("chunker", &self.chunker)
            .finish()
    }
}

impl ChunkIndex {
    /// Empty index. The vector dimension is taken from the embedder and is
    /// fixed for the lifetime of the index.
    pub fn new(embedder: Arc<dyn Embedder>, chunker: Chunker, metric: SimilarityMetric) -> Self {
        let snapshot = IndexSnapshot::empty(embedder.dimension(), metric);
        Self::with_snapshot(embedder, chunker, snapshot)
    }

    /// Empty index with chunking and metric taken from `config`.
    pub fn from_config(
        config: &ContextConfig,
        embedder: Arc<dyn Embedder>,
        counter: Arc<dyn TokenCounter>,
    ) -> Self {
        Self::new(
            embedder,
            Chunker::from_config(config, counter),
            config.similarity_metric,
        )
    }

    pub(crate) fn with_snapshot(
        embedder: Arc<dyn Embedder>,
        chunker: Chunker,
        snapshot: IndexSnapshot,
    ) -> Self {
        Self {
            current: ArcSwap::from_pointee(snapshot),
            writer: tokio::sync::Mutex::new(()),
            chunker,
            embedder,
        }
    }

    /// The current generation. Cheap: one `Arc` clone.
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        self.current.load_full()
    }

    fn publish(&self, next: IndexSnapshot) {
        self.current.store(Arc::new(next));
    }

    pub fn generation(&self) -> u64 {
        self.snapshot().generation()
    }

    pub fn dimension(&self) -> usize {
        self.snapshot().dimension()
    }

    pub fn metric(&self) -> SimilarityMetric {
        self.snapshot().metric()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    pub fn document_count(&self) -> usize {
        self.snapshot().document_count()
    }

    pub fn get_chunk(&self, chunk_id: &str) -> Option<Arc<DocumentChunk>> {
        self.snapshot().get_chunk(chunk_id).cloned()
    }

    pub fn chunker(&self) -> &Chunker {
        &self.chunker
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Chunk, embed and index a document. Returns the ids of its chunks.
    ///
    /// Re-adding identical content is a no-op that returns the existing
    /// ids. Changed content supersedes the previous chunks under a new
    /// revision.
    pub async fn add_document(&self, doc_id: &str, text: &str) -> Result<Vec<String>, IndexError> {
        let _writer = self.writer.lock().await;
        let base = self.snapshot();
        let hash = content_hash(text);

        let previous = base.document(doc_id);
        if let Some(record) = previous
            && record.content_hash == hash
        {
            debug!(doc_id, revision = record.revision, "Document unchanged, skipping re-index");
            return Ok(record.chunk_ids.clone());
        }
        let revision = previous.map_or(1, |r| r.revision + 1);

        let spans = self.chunker.split(text);
        let texts: Vec<String> = spans.iter().map(|s| s.text(text).to_string()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;
        if vectors.len() != texts.len() {
            return Err(IndexError::EmbeddingFailed(format!(
                "embedder returned {} vectors for {} chunks",
                vectors.len(),
                texts.len()
            )));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != base.dimension) {
            return Err(IndexError::DimensionMismatch {
                expected: base.dimension,
                actual: bad.len(),
            });
        }

        let mut next = base.as_ref().clone();
        if previous.is_some() {
            next.remove_chunks_of(doc_id);
        }

        let mut chunk_ids = Vec::with_capacity(spans.len());
        for (chunk_index, ((span, chunk_text), vector)) in
            spans.iter().zip(texts).zip(vectors).enumerate()
        {
            let chunk_id = format!("{doc_id}:{revision}:{chunk_index}");
            chunk_ids.push(chunk_id.clone());
            next.push_chunk(DocumentChunk {
                chunk_id,
                source_doc_id: doc_id.to_string(),
                chunk_index,
                token_count: self.chunker.count_tokens(&chunk_text),
                text: chunk_text,
                vector,
                start: span.start,
                end: span.end,
                overlap_len: span.overlap_len,
            });
        }

        next.documents.insert(
            doc_id.to_string(),
            DocumentRecord {
                doc_id: doc_id.to_string(),
                revision,
                content_hash: hash,
                chunk_ids: chunk_ids.clone(),
                indexed_at: Utc::now(),
            },
        );
        next.generation += 1;

        info!(
            doc_id,
            revision,
            chunks = chunk_ids.len(),
            generation = next.generation,
            "Indexed document"
        );
        self.publish(next);
        Ok(chunk_ids)
    }

    /// Remove a document and its chunks. Returns whether it was present.
    pub async fn remove_document(&self, doc_id: &str) -> bool {
        let _writer = self.writer.lock().await;
        let base = self.snapshot();
        if base.document(doc_id).is_none() {
            return false;
        }

        let mut next = base.as_ref().clone();
        next.documents.remove(doc_id);
        next.remove_chunks_of(doc_id);
        next.generation += 1;

        info!(doc_id, generation = next.generation, "Removed document");
        self.publish(next);
        true
    }

    /// Vector search on the current generation.
    pub fn search_vector(
        &self,
        query_vector: &[f32],
        top_n: usize,
    ) -> Result<Vec<ScoredChunk>, IndexError> {
        self.snapshot().search_vector(query_vector, top_n, None)
    }

    /// BM25 search on the current generation.
    pub fn search_lexical(&self, query_text: &str, top_n: usize) -> Vec<ScoredChunk> {
        self.snapshot().search_lexical(query_text, top_n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::HashingEmbedder;
    use async_trait::async_trait;
    use ctxpack_core::WhitespaceTokenCounter;

    fn index() -> ChunkIndex {
        let chunker = Chunker::new(8, 2, Arc::new(WhitespaceTokenCounter));
        ChunkIndex::new(
            Arc::new(HashingEmbedder::new(64)),
            chunker,
            SimilarityMetric::Cosine,
        )
    }

    #[tokio::test]
    async fn add_document_assigns_revisioned_ids() {
        let index = index();
        let ids = index
            .add_document(
                "guide",
                "Budgets bound the context window tightly.\n\nRetrieval fills it with ranked passages.",
            )
            .await
            .unwrap();
        assert_eq!(ids, vec!["guide:1:0", "guide:1:1"]);
        assert_eq!(index.len(), 2);
        assert_eq!(index.document_count(), 1);
        assert_eq!(index.generation(), 1);

        let chunk = index.get_chunk("guide:1:1").unwrap();
        assert_eq!(chunk.source_doc_id, "guide");
        assert_eq!(chunk.chunk_index, 1);
        assert_eq!(chunk.vector.len(), 64);
    }

    #[test]
    fn from_config_applies_chunking_and_metric() {
        let config = ContextConfig {
            chunk_size: 40,
            chunk_overlap: 5,
            similarity_metric: SimilarityMetric::InnerProduct,
            ..ContextConfig::default()
        };
        let index = ChunkIndex::from_config(
            &config,
            Arc::new(HashingEmbedder::new(16)),
            Arc::new(WhitespaceTokenCounter),
        );
        assert_eq!(index.chunker().chunk_size(), 40);
        assert_eq!(index.chunker().chunk_overlap(), 5);
        assert_eq!(index.metric(), SimilarityMetric::InnerProduct);
        assert_eq!(index.dimension(), 16);
    }

    #[tokio::test]
    async fn identical_re_add_is_noop() {
        let index = index();
        let first = index.add_document("a", "same text").await.unwrap();
        let second = index.add_document("a", "same text").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(index.generation(), 1);
    }

    #[tokio::test]
    async fn changed_content_supersedes_old_chunks() {
        let index = index();
        index.add_document("a", "old words about cats").await.unwrap();
        let ids = index.add_document("a", "new words about dogs").await.unwrap();
        assert_eq!(ids, vec!["a:2:0"]);
        assert!(index.get_chunk("a:1:0").is_none());
        assert_eq!(index.len(), 1);
        assert!(index.search_lexical("cats", 5).is_empty());
        assert_eq!(index.search_lexical("dogs", 5)[0].chunk_id, "a:2:0");
    }

    #[tokio::test]
    async fn remove_document_drops_chunks() {
        let index = index();
        index.add_document("a", "alpha text").await.unwrap();
        index.add_document("b", "beta text").await.unwrap();
        assert!(index.remove_document("a").await);
        assert!(!index.remove_document("a").await);
        assert_eq!(index.document_count(), 1);
        let hits = index.search_lexical("text", 5);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, "b:1:0");
    }

    #[tokio::test]
    async fn empty_document_indexes_no_chunks() {
        let index = index();
        let ids = index.add_document("blank", "   ").await.unwrap();
        assert!(ids.is_empty());
        assert_eq!(index.document_count(), 1);
        assert!(index.is_empty());
    }

    #[tokio::test]
    async fn vector_search_rejects_wrong_dimension() {
        let index = index();
        index.add_document("a", "alpha").await.unwrap();
        let err = index.search_vector(&[1.0, 0.0], 5).unwrap_err();
        assert!(matches!(
            err,
            IndexError::DimensionMismatch {
                expected: 64,
                actual: 2
            }
        ));
    }

    #[tokio::test]
    async fn vector_search_finds_matching_chunk() {
        let index = index();
        index.add_document("pets", "cats and dogs").await.unwrap();
        index.add_document("space", "rockets and orbits").await.unwrap();
        let query = HashingEmbedder::new(64).embed_text("rockets orbits");
        let hits = index.search_vector(&query, 2).unwrap();
        assert_eq!(hits[0].chunk_id, "space:1:0");
    }

    struct WrongDimension;

    #[async_trait]
    impl Embedder for WrongDimension {
        fn name(&self) -> &str {
            "wrong"
        }
        fn dimension(&self) -> usize {
            4
        }
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, IndexError> {
            Ok(vec![1.0; 3])
        }
    }

    #[tokio::test]
    async fn mismatched_embedding_rejected() {
        let chunker = Chunker::new(8, 2, Arc::new(WhitespaceTokenCounter));
        let index = ChunkIndex::new(Arc::new(WrongDimension), chunker, SimilarityMetric::Cosine);
        let err = index.add_document("a", "some text").await.unwrap_err();
        assert!(matches!(
            err,
            IndexError::DimensionMismatch {
                expected: 4,
                actual: 3
            }
        ));
        assert_eq!(index.generation(), 0);
        assert_eq!(index.document_count(), 0);
    }

    #[tokio::test]
    async fn snapshot_is_unaffected_by_later_writes() {
        let index = index();
        index.add_document("a", "first document").await.unwrap();
        let before = index.snapshot();
        index.add_document("b", "second document").await.unwrap();

        assert_eq!(before.generation(), 1);
        assert_eq!(before.len(), 1);
        assert_eq!(index.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn held_snapshots_never_block_publishing() {
        let index = index();
        let held: Vec<Arc<IndexSnapshot>> = (0..8).map(|_| index.snapshot()).collect();
        for i in 0..3 {
            index
                .add_document(&format!("doc{i}"), "published while readers hold snapshots")
                .await
                .unwrap();
        }
        assert!(held.iter().all(|s| s.generation() == 0));
        assert_eq!(index.generation(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_readers_see_whole_generations() {
        let index = Arc::new(index());
        let writer = {
            let index = Arc::clone(&index);
            tokio::spawn(async move {
                for i in 0..20 {
                    // Each document is one chunk.
                    index
                        .add_document(&format!("doc{i}"), &format!("shared term {i}"))
                        .await
                        .unwrap();
                }
            })
        };

        let mut readers = Vec::new();
        for _ in 0..4 {
            let index = Arc::clone(&index);
            readers.push(tokio::spawn(async move {
                for _ in 0..50 {
                    let snapshot = index.snapshot();
                    // Generation g holds exactly g single-chunk documents.
                    assert_eq!(snapshot.len() as u64, snapshot.generation());
                    assert_eq!(snapshot.document_count() as u64, snapshot.generation());
                    assert_eq!(
                        snapshot.search_lexical("shared", 100).len() as u64,
                        snapshot.generation()
                    );
                    tokio::task::yield_now().await;
                }
            }));
        }

        writer.await.unwrap();
        for reader in readers {
            reader.await.unwrap();
        }
        assert_eq!(index.generation(), 20);
    }
}
