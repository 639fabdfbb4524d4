//! Chunk index and hybrid retrieval for ctxpack.
//!
//! - [`Chunker`]: paragraph / sentence / hard-cut splitting with overlap
//! - [`ChunkIndex`]: vector + BM25 search over copy-on-write snapshots,
//!   with JSON-lines persistence
//! - [`HybridRetriever`]: RRF fusion of both rankings, optional rerank
//! - [`WorkspaceIndexer`]: incremental indexing of workspace files
//! - [`HashingEmbedder`]: a local, model-free [`Embedder`](ctxpack_core::Embedder)

pub mod chunker;
pub mod embedder;
pub mod fusion;
pub mod index;
pub mod lexical;
pub mod rerank;
pub mod retriever;
pub mod store;
pub mod vector;
pub mod workspace;

pub use chunker::{ChunkSpan, Chunker};
pub use embedder::HashingEmbedder;
pub use fusion::reciprocal_rank_fusion;
pub use index::{ChunkIndex, DocumentRecord, IndexSnapshot, ScoredChunk, content_hash};
pub use lexical::LexicalIndex;
pub use rerank::{TermOverlapReranker, apply_rerank};
pub use retriever::{HybridRetriever, RetrieverSettings, to_context_items};
pub use vector::{cosine_similarity, inner_product};
pub use workspace::{
    FileIndexOutcome, WorkspaceFile, WorkspaceIndexReport, WorkspaceIndexer,
};
