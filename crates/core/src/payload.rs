//! The assembled context payload and its bookkeeping records.

use serde::{Deserialize, Serialize};

use crate::item::{ContextItem, Priority, SourceKind};

/// Why an item did not make it into the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Did not fit in the remaining budget.
    BudgetExhausted,
    /// Was included, then removed to make room for a CRITICAL item.
    Evicted,
}

/// Record of an item left out of the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropInfo {
    pub name: String,
    pub source_kind: SourceKind,
    pub priority: Priority,
    pub token_cost: usize,
    pub sequence_index: usize,
    pub reason: DropReason,
}

impl DropInfo {
    pub fn from_item(item: &ContextItem, reason: DropReason) -> Self {
        Self {
            name: item.name.clone(),
            source_kind: item.source_kind,
            priority: item.priority,
            token_cost: item.token_cost,
            sequence_index: item.sequence_index,
            reason,
        }
    }
}

/// Record of an item whose content was cut to fit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TruncationInfo {
    pub name: String,
    pub original_tokens: usize,
    pub kept_tokens: usize,
}

/// A non-fatal failure recorded while gathering candidates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildWarning {
    pub source_kind: SourceKind,
    /// What the warning is about: a reference, a query, a source name.
    pub subject: String,
    pub message: String,
}

impl BuildWarning {
    pub fn new(source_kind: SourceKind, subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            source_kind,
            subject: subject.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for BuildWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.source_kind, self.subject, self.message)
    }
}

/// The result of budget allocation: what goes to the model, and why
/// everything else does not.
///
/// Included items are kept in tier-then-sequence order. A payload is
/// never modified in place once returned; extending it produces a new one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextPayload {
    pub items: Vec<ContextItem>,
    pub used_tokens: usize,
    pub max_tokens: usize,
    pub reserved_tokens: usize,
    #[serde(default)]
    pub dropped_items: Vec<DropInfo>,
    #[serde(default)]
    pub truncated_items: Vec<TruncationInfo>,
    #[serde(default)]
    pub warnings: Vec<BuildWarning>,
}

impl ContextPayload {
    /// Tokens available for items: `max_tokens - reserved_tokens`.
    pub fn budget(&self) -> usize {
        self.max_tokens.saturating_sub(self.reserved_tokens)
    }

    pub fn remaining_tokens(&self) -> usize {
        self.budget().saturating_sub(self.used_tokens)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.items.iter().any(|i| i.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&ContextItem> {
        self.items.iter().find(|i| i.name == name)
    }

    pub fn items_of(&self, kind: SourceKind) -> impl Iterator<Item = &ContextItem> {
        self.items.iter().filter(move |i| i.source_kind == kind)
    }

    pub fn with_warnings(mut self, warnings: Vec<BuildWarning>) -> Self {
        self.warnings.extend(warnings);
        self
    }
}
