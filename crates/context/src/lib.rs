//! Context assembly for ctxpack.
//!
//! One build gathers candidates from three places, runs them through the
//! budget allocator and hands back a [`ContextPayload`](ctxpack_core::ContextPayload):
//!
//! ```text
//! text ──► PathReferenceResolver ─┐
//!                                 ├─► ContextBudgetAllocator ─► ContextAssembler
//! query ─► HybridRetriever ───────┘          ▲
//!          custom / tool items ──────────────┘
//! ```

pub mod allocator;
pub mod assembler;
pub mod builder;
pub mod engine;
pub mod references;

pub use allocator::ContextBudgetAllocator;
pub use assembler::{ContextAssembler, SerializedContext};
pub use builder::ContextItemsBuilder;
pub use engine::ContextEngine;
pub use references::{PathReferenceResolver, ResolvedReferences};
