//! Configuration loading, validation, and management for ctxpack.
//!
//! A single immutable [`ContextConfig`] value is passed into every build;
//! there are no process-wide mutable settings. It loads from a TOML file
//! (`ctxpack.toml` by default, or the path in `CTXPACK_CONFIG`) with
//! `CTXPACK_*` environment variable overrides, and is validated before use.

use ctxpack_core::{Priority, SimilarityMetric};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Every tunable of the context engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextConfig {
    // --- Budget ---
    /// Hard ceiling on the model context, in tokens.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Tokens held back for the model's response and message framing.
    #[serde(default = "default_reserved_tokens")]
    pub reserved_tokens: usize,

    /// Minimum fraction of a CRITICAL item that truncation may keep
    /// before the build is declared infeasible.
    #[serde(default = "default_critical_truncation_floor")]
    pub critical_truncation_floor: f64,

    // --- Indexing ---
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    #[serde(default)]
    pub similarity_metric: SimilarityMetric,

    // --- Retrieval ---
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    #[serde(default = "default_candidate_pool_n")]
    pub candidate_pool_n: usize,

    /// The `k` constant of Reciprocal Rank Fusion.
    #[serde(default = "default_rrf_k")]
    pub rrf_k: usize,

    #[serde(default)]
    pub rerank_enabled: bool,

    /// Vector hits scoring below this are discarded before fusion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_vector_score: Option<f32>,

    #[serde(default = "default_rag_priority")]
    pub rag_priority: Priority,

    #[serde(default = "default_retrieval_timeout_ms")]
    pub retrieval_timeout_ms: u64,

    // --- Path references ---
    #[serde(default = "default_true")]
    pub enable_path_references: bool,

    #[serde(default = "default_reference_marker")]
    pub reference_marker: char,

    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,

    /// Glob patterns (relative to the workspace root) a referenced file
    /// must match.
    #[serde(default = "default_path_whitelist_patterns")]
    pub path_whitelist_patterns: Vec<String>,

    /// File extensions treated as text. Anything else is rejected.
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,

    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Cut oversized files at `max_file_size` instead of rejecting them.
    #[serde(default)]
    pub truncate_oversized_files: bool,

    #[serde(default = "default_max_directory_entries")]
    pub max_directory_entries: usize,

    #[serde(default = "default_path_reference_priority")]
    pub path_reference_priority: Priority,

    #[serde(default = "default_file_read_timeout_ms")]
    pub file_read_timeout_ms: u64,
}

fn default_max_tokens() -> usize {
    8000
}
fn default_reserved_tokens() -> usize {
    1000
}
fn default_critical_truncation_floor() -> f64 {
    0.5
}
fn default_chunk_size() -> usize {
    250
}
fn default_chunk_overlap() -> usize {
    50
}
fn default_top_k() -> usize {
    5
}
fn default_candidate_pool_n() -> usize {
    20
}
fn default_rrf_k() -> usize {
    60
}
fn default_rag_priority() -> Priority {
    Priority::Medium
}
fn default_retrieval_timeout_ms() -> u64 {
    5000
}
fn default_true() -> bool {
    true
}
fn default_reference_marker() -> char {
    '@'
}
fn default_workspace_root() -> PathBuf {
    PathBuf::from(".")
}
fn default_path_whitelist_patterns() -> Vec<String> {
    [
        "**/*.py", "**/*.md", "**/*.txt", "**/*.json", "**/*.yaml", "**/*.rs", "**/*.toml",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_allowed_extensions() -> Vec<String> {
    [
        "md", "markdown", "txt", "rst", "json", "jsonl", "yaml", "yml", "toml", "ini", "cfg", "csv",
        "xml", "html", "css", "py", "rs", "js", "ts", "go", "java", "c", "h", "cpp", "hpp", "sh",
        "sql",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_max_file_size() -> u64 {
    1024 * 1024
}
fn default_max_directory_entries() -> usize {
    20
}
fn default_path_reference_priority() -> Priority {
    Priority::High
}
fn default_file_read_timeout_ms() -> u64 {
    2000
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            reserved_tokens: default_reserved_tokens(),
            critical_truncation_floor: default_critical_truncation_floor(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            similarity_metric: SimilarityMetric::default(),
            top_k: default_top_k(),
            candidate_pool_n: default_candidate_pool_n(),
            rrf_k: default_rrf_k(),
            rerank_enabled: false,
            min_vector_score: None,
            rag_priority: default_rag_priority(),
            retrieval_timeout_ms: default_retrieval_timeout_ms(),
            enable_path_references: true,
            reference_marker: default_reference_marker(),
            workspace_root: default_workspace_root(),
            path_whitelist_patterns: default_path_whitelist_patterns(),
            allowed_extensions: default_allowed_extensions(),
            max_file_size: default_max_file_size(),
            truncate_oversized_files: false,
            max_directory_entries: default_max_directory_entries(),
            path_reference_priority: default_path_reference_priority(),
            file_read_timeout_ms: default_file_read_timeout_ms(),
        }
    }
}

impl ContextConfig {
    /// Load configuration from `CTXPACK_CONFIG` (or `./ctxpack.toml`),
    /// then apply `CTXPACK_*` environment overrides.
    ///
    /// Recognized overrides:
    /// - `CTXPACK_MAX_TOKENS`, `CTXPACK_RESERVED_TOKENS`
    /// - `CTXPACK_TOP_K`, `CTXPACK_CANDIDATE_POOL_N`, `CTXPACK_RERANK_ENABLED`
    /// - `CTXPACK_WORKSPACE_ROOT`, `CTXPACK_MAX_FILE_SIZE`
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("CTXPACK_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("ctxpack.toml"));
        let mut config = Self::load_from(&path)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// [`load`](Self::load)).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("CTXPACK_MAX_TOKENS") {
            self.max_tokens = parse_var("CTXPACK_MAX_TOKENS", &v)?;
        }
        if let Some(v) = lookup("CTXPACK_RESERVED_TOKENS") {
            self.reserved_tokens = parse_var("CTXPACK_RESERVED_TOKENS", &v)?;
        }
        if let Some(v) = lookup("CTXPACK_TOP_K") {
            self.top_k = parse_var("CTXPACK_TOP_K", &v)?;
        }
        if let Some(v) = lookup("CTXPACK_CANDIDATE_POOL_N") {
            self.candidate_pool_n = parse_var("CTXPACK_CANDIDATE_POOL_N", &v)?;
        }
        if let Some(v) = lookup("CTXPACK_RERANK_ENABLED") {
            self.rerank_enabled = parse_var("CTXPACK_RERANK_ENABLED", &v)?;
        }
        if let Some(v) = lookup("CTXPACK_WORKSPACE_ROOT") {
            self.workspace_root = PathBuf::from(v);
        }
        if let Some(v) = lookup("CTXPACK_MAX_FILE_SIZE") {
            self.max_file_size = parse_var("CTXPACK_MAX_FILE_SIZE", &v)?;
        }
        Ok(())
    }

    /// Tokens available to items: `max_tokens - reserved_tokens`.
    pub fn budget(&self) -> usize {
        self.max_tokens.saturating_sub(self.reserved_tokens)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_tokens == 0 {
            return Err(ConfigError::ValidationError("max_tokens must be > 0".into()));
        }

        if self.reserved_tokens >= self.max_tokens {
            return Err(ConfigError::ValidationError(format!(
                "reserved_tokens ({}) must be less than max_tokens ({})",
                self.reserved_tokens, self.max_tokens
            )));
        }

        if !(0.0..=1.0).contains(&self.critical_truncation_floor) {
            return Err(ConfigError::ValidationError(
                "critical_truncation_floor must be between 0.0 and 1.0".into(),
            ));
        }

        if self.chunk_size == 0 {
            return Err(ConfigError::ValidationError("chunk_size must be > 0".into()));
        }

        if self.chunk_overlap >= self.chunk_size {
            return Err(ConfigError::ValidationError(
                "chunk_overlap must be smaller than chunk_size".into(),
            ));
        }

        if self.top_k == 0 {
            return Err(ConfigError::ValidationError("top_k must be > 0".into()));
        }

        if self.top_k > self.candidate_pool_n {
            return Err(ConfigError::ValidationError(format!(
                "top_k ({}) must not exceed candidate_pool_n ({})",
                self.top_k, self.candidate_pool_n
            )));
        }

        if self.rrf_k == 0 {
            return Err(ConfigError::ValidationError("rrf_k must be > 0".into()));
        }

        if self.reference_marker.is_alphanumeric() || self.reference_marker.is_whitespace() {
            return Err(ConfigError::ValidationError(format!(
                "reference_marker '{}' must be a punctuation character",
                self.reference_marker
            )));
        }

        for pattern in &self.path_whitelist_patterns {
            globset::Glob::new(pattern).map_err(|e| {
                ConfigError::ValidationError(format!("invalid whitelist pattern '{pattern}': {e}"))
            })?;
        }

        if self.file_read_timeout_ms == 0 || self.retrieval_timeout_ms == 0 {
            return Err(ConfigError::ValidationError("timeouts must be > 0".into()));
        }

        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

fn parse_var<T>(var: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidEnv {
        var: var.to_string(),
        reason: e.to_string(),
    })
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Invalid value for {var}: {reason}")]
    InvalidEnv { var: String, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for ctxpack_core::Error {
    fn from(err: ConfigError) -> Self {
        ctxpack_core::Error::config(err.to_string())
    }
}
