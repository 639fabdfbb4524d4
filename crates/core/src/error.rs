//! Error types for the ctxpack domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; the top-level [`Error`]
//! wraps them. Only [`Error::Config`] and [`Error::BudgetInfeasible`] are
//! fatal for a context build, everything else is recorded and skipped.

use thiserror::Error;

/// The top-level error type for all ctxpack operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Fatal build errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error(
        "Budget infeasible for '{item}': requires {required} tokens, {available} available ({detail})"
    )]
    BudgetInfeasible {
        item: String,
        required: usize,
        available: usize,
        detail: String,
    },

    // --- Bounded contexts ---
    #[error("Reference error: {0}")]
    Reference(#[from] ReferenceError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Shorthand for a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Whether this error aborts a context build.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config { .. } | Self::BudgetInfeasible { .. })
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures while resolving a single `@path` reference.
#[derive(Debug, Clone, Error)]
pub enum ReferenceError {
    #[error("Security violation for '{reference}': {reason}")]
    SecurityViolation { reference: String, reason: String },

    #[error("Unsupported content in '{reference}': {reason}")]
    UnsupportedContent { reference: String, reason: String },

    #[error("File '{reference}' is too large: {size} bytes (max: {max_size})")]
    ContentTooLarge {
        reference: String,
        size: u64,
        max_size: u64,
    },

    #[error("Path not found: {0}")]
    NotFound(String),

    #[error("Reading '{reference}' timed out after {timeout_ms}ms")]
    Timeout { reference: String, timeout_ms: u64 },

    #[error("I/O error reading '{reference}': {reason}")]
    Io { reference: String, reason: String },
}

impl ReferenceError {
    /// The reference text this error is about.
    pub fn reference(&self) -> &str {
        match self {
            Self::SecurityViolation { reference, .. }
            | Self::UnsupportedContent { reference, .. }
            | Self::ContentTooLarge { reference, .. }
            | Self::Timeout { reference, .. }
            | Self::Io { reference, .. } => reference,
            Self::NotFound(reference) => reference,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum IndexError {
    #[error("Vector dimension mismatch: index expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Corrupt index data: {0}")]
    Corrupt(String),
}

#[derive(Debug, Clone, Error)]
pub enum RetrievalError {
    #[error("Retrieval timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The index's storage failed or is corrupt; no query can be served.
    #[error("Index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("Index query failed: {0}")]
    Index(#[source] IndexError),

    #[error("Query embedding failed: {0}")]
    EmbeddingFailed(String),

    #[error("Rerank failed: {0}")]
    RerankFailed(String),
}

impl From<IndexError> for RetrievalError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::Storage(reason) | IndexError::Corrupt(reason) => {
                Self::IndexUnavailable(reason)
            }
            other => Self::Index(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_infeasible_displays_details() {
        let err = Error::BudgetInfeasible {
            item: "safety".into(),
            required: 12000,
            available: 5000,
            detail: "truncation below floor".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("safety"));
        assert!(msg.contains("12000"));
        assert!(msg.contains("5000"));
        assert!(err.is_fatal());
    }

    #[test]
    fn reference_errors_are_not_fatal() {
        let err = Error::from(ReferenceError::SecurityViolation {
            reference: "../../etc/passwd".into(),
            reason: "escapes workspace root".into(),
        });
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("escapes workspace root"));
    }

    #[test]
    fn reference_accessor_covers_all_variants() {
        let err = ReferenceError::NotFound("docs/missing.md".into());
        assert_eq!(err.reference(), "docs/missing.md");

        let err = ReferenceError::ContentTooLarge {
            reference: "big.txt".into(),
            size: 10,
            max_size: 5,
        };
        assert_eq!(err.reference(), "big.txt");
    }

    #[test]
    fn index_error_converts_into_retrieval_error() {
        let err: RetrievalError = IndexError::DimensionMismatch {
            expected: 4,
            actual: 3,
        }
        .into();
        assert!(err.to_string().contains("expects 4"));
        assert!(matches!(err, RetrievalError::Index(_)));
    }

    #[test]
    fn storage_failures_make_the_index_unavailable() {
        let err: RetrievalError = IndexError::Corrupt("missing header line".into()).into();
        assert!(matches!(err, RetrievalError::IndexUnavailable(ref r) if r == "missing header line"));

        let err: RetrievalError = IndexError::Storage("disk full".into()).into();
        assert_eq!(err.to_string(), "Index unavailable: disk full");
    }
}
