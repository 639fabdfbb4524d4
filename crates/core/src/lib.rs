//! # ctxpack Core
//!
//! Domain types, traits, and error definitions for the ctxpack context
//! engine. It carries no I/O and no async runtime; it defines
//! the model that the index and context crates implement against.
//!
//! ## Contents
//!
//! - [`ContextItem`], [`Priority`], [`SourceKind`]: the unit of allocation
//! - [`DocumentChunk`], [`RetrievalCandidate`]: indexing and retrieval records
//! - [`ContextPayload`]: the allocator's output
//! - [`TokenCounter`], [`Embedder`], [`Reranker`]: external collaborators

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod item;
pub mod payload;
pub mod rerank;
pub mod token;

// Re-export key types at crate root for ergonomics
pub use chunk::{DocumentChunk, RetrievalCandidate, SimilarityMetric};
pub use embedding::Embedder;
pub use error::{Error, IndexError, ReferenceError, Result, RetrievalError};
pub use item::{ContextItem, Priority, SourceKind};
pub use payload::{BuildWarning, ContextPayload, DropInfo, DropReason, TruncationInfo};
pub use rerank::Reranker;
pub use token::{HeuristicTokenCounter, TokenCounter, WhitespaceTokenCounter, estimate_tokens};
