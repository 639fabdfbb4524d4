//! Owned builder for context item lists.
//!
//! ```rust,ignore
//! let items = ContextItemsBuilder::new(counter)
//!     .add_custom("rules", "Answer in English.", Priority::Critical)
//!     .add_tool_output("search", results, Priority::Low)
//!     .build();
//! ```
//!
//! Each appended item gets the next `sequence_index`, so the allocator's
//! within-tier order is exactly the append order.

use std::sync::Arc;

use ctxpack_core::{ContextItem, Priority, SourceKind, TokenCounter};

#[derive(Clone)]
pub struct ContextItemsBuilder {
    counter: Arc<dyn TokenCounter>,
    items: Vec<ContextItem>,
}

impl std::fmt::Debug for ContextItemsBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextItemsBuilder")
            .field("counter", &self.counter.name())
            .field("items", &self.items.len())
            .finish()
    }
}

impl ContextItemsBuilder {
    pub fn new(counter: Arc<dyn TokenCounter>) -> Self {
        Self {
            counter,
            items: Vec::new(),
        }
    }

    /// Caller-supplied free-form entry; cost measured with the builder's counter.
    pub fn add_custom(
        self,
        name: impl Into<String>,
        content: impl Into<String>,
        priority: Priority,
    ) -> Self {
        self.add_text(name, content, SourceKind::Custom, priority)
    }

    pub fn add_tool_output(
        self,
        name: impl Into<String>,
        content: impl Into<String>,
        priority: Priority,
    ) -> Self {
        self.add_text(name, content, SourceKind::Tool, priority)
    }

    /// Append a prepared item, keeping its cost and restamping its sequence.
    pub fn add(mut self, item: ContextItem) -> Self {
        let sequence_index = self.items.len();
        self.items.push(item.with_sequence_index(sequence_index));
        self
    }

    /// Append prepared items in iteration order.
    pub fn extend(self, items: impl IntoIterator<Item = ContextItem>) -> Self {
        items.into_iter().fold(self, Self::add)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn build(self) -> Vec<ContextItem> {
        self.items
    }

    fn add_text(
        self,
        name: impl Into<String>,
        content: impl Into<String>,
        source_kind: SourceKind,
        priority: Priority,
    ) -> Self {
        let content = content.into();
        let cost = self.counter.count(&content);
        self.add(ContextItem::new(name, content, source_kind, priority, cost))
    }
}
