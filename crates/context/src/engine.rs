//! ContextEngine — the single entry point for building a turn's context.
//!
//! One build:
//! 1. Validate the configuration
//! 2. Resolve `@path` references and run hybrid retrieval concurrently
//! 3. Stamp sequence indices in a fixed source order
//!    (custom, path_reference, rag, tool)
//! 4. Allocate against the token budget and attach warnings
//!
//! Only configuration errors and infeasible budgets fail a build. A bad
//! reference or an unavailable retrieval source becomes a warning, unless
//! that source is configured at CRITICAL priority.

use std::sync::Arc;

use ctxpack_config::ContextConfig;
use ctxpack_core::{
    BuildWarning, ContextItem, ContextPayload, Embedder, Error, Priority, Reranker, Result,
    SourceKind, TokenCounter,
};
use ctxpack_index::{ChunkIndex, HybridRetriever};
use tracing::{debug, info, warn};

use crate::allocator::ContextBudgetAllocator;
use crate::assembler::{ContextAssembler, SerializedContext};
use crate::builder::ContextItemsBuilder;
use crate::references::{PathReferenceResolver, ResolvedReferences};

pub struct ContextEngine {
    index: Arc<ChunkIndex>,
    embedder: Arc<dyn Embedder>,
    counter: Arc<dyn TokenCounter>,
    reranker: Option<Arc<dyn Reranker>>,
}

impl std::fmt::Debug for ContextEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextEngine")
            .field("index", &self.index)
            .field("embedder", &self.embedder.name())
            .field("counter", &self.counter.name())
            .field("reranker", &self.reranker.as_ref().map(|r| r.name().to_string()))
            .finish()
    }
}

impl ContextEngine {
    /// Engine over `index`, embedding queries with the index's embedder
    /// and costing text with its chunker's token counter.
    pub fn new(index: Arc<ChunkIndex>) -> Result<Self> {
        let embedder = Arc::clone(index.embedder());
        let counter = Arc::clone(index.chunker().counter());
        Self::with_parts(index, embedder, counter)
    }

    /// Engine with a separate query embedder and token counter. The
    /// embedder must produce vectors of the index dimension.
    pub fn with_parts(
        index: Arc<ChunkIndex>,
        embedder: Arc<dyn Embedder>,
        counter: Arc<dyn TokenCounter>,
    ) -> Result<Self> {
        if embedder.dimension() != index.dimension() {
            return Err(Error::config(format!(
                "embedder '{}' produces {}-dimensional vectors, index expects {}",
                embedder.name(),
                embedder.dimension(),
                index.dimension()
            )));
        }
        Ok(Self {
            index,
            embedder,
            counter,
            reranker: None,
        })
    }

    /// Rerank with `reranker` when `rerank_enabled` is set, instead of the
    /// built-in term-overlap scorer.
    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    pub fn index(&self) -> &Arc<ChunkIndex> {
        &self.index
    }

    pub fn counter(&self) -> &Arc<dyn TokenCounter> {
        &self.counter
    }

    /// Builder for custom and tool items, costed with this engine's counter.
    pub fn items_builder(&self) -> ContextItemsBuilder {
        ContextItemsBuilder::new(Arc::clone(&self.counter))
    }

    /// Assemble the context for one turn.
    ///
    /// `custom_items` and `tool_items` keep their relative order; their
    /// incoming `sequence_index` values are replaced.
    pub async fn build_context(
        &self,
        query_text: &str,
        text_with_references: &str,
        custom_items: Vec<ContextItem>,
        tool_items: Vec<ContextItem>,
        config: &ContextConfig,
    ) -> Result<ContextPayload> {
        config.validate()?;

        let resolver = if config.enable_path_references {
            Some(PathReferenceResolver::new(config, Arc::clone(&self.counter))?)
        } else {
            None
        };
        let retriever = self.retriever(config);

        let resolution = async {
            match &resolver {
                Some(resolver) => resolver.resolve(text_with_references).await,
                None => ResolvedReferences::default(),
            }
        };
        let retrieval = async {
            if query_text.trim().is_empty() {
                debug!("Empty query, skipping retrieval");
                return Ok(Vec::new());
            }
            retriever
                .retrieve_for_query(
                    query_text,
                    config.top_k,
                    config.candidate_pool_n,
                    config.rag_priority,
                )
                .await
        };
        let (references, retrieved) = tokio::join!(resolution, retrieval);

        if config.path_reference_priority == Priority::Critical
            && let Some(err) = references.unavailable()
        {
            return Err(critical_source_unavailable(
                err.reference(),
                config,
                &err.to_string(),
            ));
        }

        let ResolvedReferences {
            items: reference_items,
            mut warnings,
            ..
        } = references;

        let rag_items = match retrieved {
            Ok(items) => items,
            Err(e) if config.rag_priority == Priority::Critical => {
                return Err(critical_source_unavailable(
                    "retrieval",
                    config,
                    &e.to_string(),
                ));
            }
            Err(e) => {
                warn!(error = %e, "Retrieval unavailable, continuing without retrieved context");
                warnings.push(BuildWarning::new(SourceKind::Rag, query_text, e.to_string()));
                Vec::new()
            }
        };

        let items = self
            .items_builder()
            .extend(custom_items)
            .extend(reference_items)
            .extend(rag_items)
            .extend(tool_items)
            .build();
        let candidates = items.len();

        let payload = ContextBudgetAllocator::from_config(config, Arc::clone(&self.counter))
            .allocate(items, config.max_tokens, config.reserved_tokens)?
            .with_warnings(warnings);

        info!(
            candidates,
            included = payload.items.len(),
            used_tokens = payload.used_tokens,
            budget = payload.budget(),
            dropped = payload.dropped_items.len(),
            truncated = payload.truncated_items.len(),
            warnings = payload.warnings.len(),
            generation = self.index.generation(),
            "Context built"
        );
        Ok(payload)
    }

    pub fn get_stats(&self, payload: &ContextPayload) -> serde_json::Value {
        ContextAssembler::stats(payload)
    }

    pub fn assemble(&self, payload: &ContextPayload) -> Result<SerializedContext> {
        ContextAssembler::assemble(payload)
    }

    fn retriever(&self, config: &ContextConfig) -> HybridRetriever {
        let retriever = HybridRetriever::from_config(Arc::clone(&self.index), config)
            .with_query_embedder(Arc::clone(&self.embedder));
        match &self.reranker {
            Some(reranker) => retriever.with_reranker(Arc::clone(reranker)),
            None => retriever,
        }
    }
}

fn critical_source_unavailable(source: &str, config: &ContextConfig, reason: &str) -> Error {
    Error::BudgetInfeasible {
        item: source.to_string(),
        required: 0,
        available: config.budget(),
        detail: format!("critical source unavailable: {reason}"),
    }
}
