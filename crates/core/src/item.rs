//! Context items — the unit the budget allocator works with.
//!
//! Every source (retrieval, `@path` references, tool outputs, caller-supplied
//! custom entries) produces [`ContextItem`]s. Items carry their own token
//! cost so the allocator never has to re-tokenize.

use serde::{Deserialize, Serialize};

/// Priority tier of a context item.
///
/// Declaration order is tier order: `Critical < High < Medium < Low`
/// under the derived `Ord`, so sorting ascending processes the most
/// important tier first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// System-level directives. Never silently dropped or truncated.
    Critical,
    High,
    Medium,
    Low,
}

impl Priority {
    /// All tiers, most important first.
    pub const ALL: [Priority; 4] = [
        Priority::Critical,
        Priority::High,
        Priority::Medium,
        Priority::Low,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    /// Position in [`Priority::ALL`].
    pub fn tier_index(&self) -> usize {
        *self as usize
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a context item came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Caller-supplied free-form entry (instructions, skills, notes).
    Custom,
    /// Passage retrieved from the chunk index.
    Rag,
    /// File or directory pulled in through an `@path` reference.
    PathReference,
    /// Output produced by an external tool.
    Tool,
}

impl SourceKind {
    /// Fixed rendering order used by the assembler.
    pub const ALL: [SourceKind; 4] = [
        SourceKind::Custom,
        SourceKind::Rag,
        SourceKind::PathReference,
        SourceKind::Tool,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Custom => "custom",
            Self::Rag => "rag",
            Self::PathReference => "path_reference",
            Self::Tool => "tool",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single candidate for inclusion in the context payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextItem {
    /// Human-readable name (file path, tool name, chunk label, ...).
    pub name: String,

    /// The text that will be handed to the model.
    pub content: String,

    pub source_kind: SourceKind,

    pub priority: Priority,

    /// Cost of `content` under the configured token counter.
    pub token_cost: usize,

    /// Insertion order; tie-breaker within a priority tier.
    pub sequence_index: usize,

    /// Source label for attribution (chunk id, file path).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citation: Option<String>,

    /// Set when `content` was cut to fit a limit.
    #[serde(default)]
    pub truncated: bool,
}

impl ContextItem {
    /// Create an item. `sequence_index` starts at 0 and is normally
    /// stamped by the builder that collects items.
    pub fn new(
        name: impl Into<String>,
        content: impl Into<String>,
        source_kind: SourceKind,
        priority: Priority,
        token_cost: usize,
    ) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
            source_kind,
            priority,
            token_cost,
            sequence_index: 0,
            citation: None,
            truncated: false,
        }
    }

    pub fn with_citation(mut self, citation: impl Into<String>) -> Self {
        self.citation = Some(citation.into());
        self
    }

    pub fn with_sequence_index(mut self, sequence_index: usize) -> Self {
        self.sequence_index = sequence_index;
        self
    }

    /// Sort key used everywhere an ordering of items is produced.
    pub fn order_key(&self) -> (Priority, usize) {
        (self.priority, self.sequence_index)
    }
}
