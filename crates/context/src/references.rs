//! Path references — pull `@path` files and directories into the context.
//!
//! A reference is the marker character (default `@`) at the start of the
//! text or after whitespace/opening punctuation, followed by a
//! workspace-relative path. Each reference goes through:
//!
//! 1. Lexical confinement (`..` may not climb above the root)
//! 2. Canonicalization, then a second confinement check (symlinks)
//! 3. Whitelist globs, extension allow-list, size limit, binary sniff
//!
//! A failing reference becomes a [`BuildWarning`] and never stops the rest.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ctxpack_config::ContextConfig;
use ctxpack_core::{
    BuildWarning, ContextItem, Error, Priority, ReferenceError, SourceKind, TokenCounter,
};
use ctxpack_security::{
    PathValidationError, PathWhitelist, ResolvedPath, WorkspaceRoot, has_allowed_extension,
    looks_binary, truncate_utf8,
};
use futures::future::join_all;
use regex::Regex;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

/// Outcome of resolving every reference in one text.
#[derive(Debug, Clone, Default)]
pub struct ResolvedReferences {
    /// Loaded items in order of first appearance.
    pub items: Vec<ContextItem>,
    pub warnings: Vec<BuildWarning>,
    /// The errors behind `warnings`, same order.
    pub failures: Vec<ReferenceError>,
}

impl ResolvedReferences {
    /// First failure caused by the source being unavailable (timeout or
    /// I/O), as opposed to a rejected reference.
    pub fn unavailable(&self) -> Option<&ReferenceError> {
        self.failures
            .iter()
            .find(|e| matches!(e, ReferenceError::Timeout { .. } | ReferenceError::Io { .. }))
    }
}

pub struct PathReferenceResolver {
    root: WorkspaceRoot,
    whitelist: PathWhitelist,
    pattern: Regex,
    counter: Arc<dyn TokenCounter>,
    allowed_extensions: Vec<String>,
    max_file_size: u64,
    truncate_oversized: bool,
    max_directory_entries: usize,
    priority: Priority,
    read_timeout: Duration,
}

impl std::fmt::Debug for PathReferenceResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathReferenceResolver")
            .field("root", &self.root)
            .field("whitelist", &self.whitelist.patterns())
            .field("counter", &self.counter.name())
            .field("max_file_size", &self.max_file_size)
            .field("priority", &self.priority)
            .finish()
    }
}

impl PathReferenceResolver {
    /// Build a resolver from `config`. Token costs of loaded files are
    /// measured with `counter`.
    pub fn new(config: &ContextConfig, counter: Arc<dyn TokenCounter>) -> Result<Self, Error> {
        let whitelist = PathWhitelist::new(&config.path_whitelist_patterns)
            .map_err(|e| Error::config(e.to_string()))?;
        let pattern = reference_pattern(config.reference_marker)?;
        let root = WorkspaceRoot::lenient(&config.workspace_root);
        debug!(root = %root.path().display(), "Path reference resolver ready");

        Ok(Self {
            root,
            whitelist,
            pattern,
            counter,
            allowed_extensions: config.allowed_extensions.clone(),
            max_file_size: config.max_file_size,
            truncate_oversized: config.truncate_oversized_files,
            max_directory_entries: config.max_directory_entries,
            priority: config.path_reference_priority,
            read_timeout: Duration::from_millis(config.file_read_timeout_ms),
        })
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    /// References in `text`, deduplicated, in order of first appearance.
    pub fn extract_references(&self, text: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut references = Vec::new();
        for captures in self.pattern.captures_iter(text) {
            let Some(raw) = captures.get(1) else {
                continue;
            };
            // "see @docs/guide.md." ends a sentence, not a path.
            let reference = raw.as_str().trim_end_matches('.');
            if reference.is_empty() {
                continue;
            }
            if seen.insert(reference.to_string()) {
                references.push(reference.to_string());
            }
        }
        references
    }

    /// Resolve every reference in `text` concurrently.
    pub async fn resolve(&self, text: &str) -> ResolvedReferences {
        let references = self.extract_references(text);
        if references.is_empty() {
            return ResolvedReferences::default();
        }

        let outcomes = join_all(references.iter().map(|r| self.resolve_reference(r))).await;

        let mut resolved = ResolvedReferences::default();
        for (reference, outcome) in references.iter().zip(outcomes) {
            match outcome {
                Ok(item) => {
                    let sequence_index = resolved.items.len();
                    resolved.items.push(item.with_sequence_index(sequence_index));
                }
                Err(e) => {
                    warn!(reference = %reference, error = %e, "Skipping path reference");
                    resolved.warnings.push(BuildWarning::new(
                        SourceKind::PathReference,
                        reference.clone(),
                        e.to_string(),
                    ));
                    resolved.failures.push(e);
                }
            }
        }

        debug!(
            references = references.len(),
            loaded = resolved.items.len(),
            skipped = resolved.failures.len(),
            "Path references resolved"
        );
        resolved
    }

    /// Load one reference under the configured read timeout.
    pub async fn resolve_reference(&self, reference: &str) -> Result<ContextItem, ReferenceError> {
        match tokio::time::timeout(self.read_timeout, self.load(reference)).await {
            Ok(result) => result,
            Err(_) => Err(ReferenceError::Timeout {
                reference: reference.into(),
                timeout_ms: self.read_timeout.as_millis() as u64,
            }),
        }
    }

    async fn load(&self, reference: &str) -> Result<ContextItem, ReferenceError> {
        let candidate = self
            .root
            .confine(reference)
            .map_err(|e| path_error(reference, e))?;
        // Decided before any filesystem access, so a failed lookup of a
        // non-whitelisted path reads the same as a rejected existing file.
        let whitelisted = self
            .root
            .lexical_relative(reference)
            .is_ok_and(|relative| self.whitelist.is_allowed(&relative));
        let canonical = match tokio::fs::canonicalize(&candidate).await {
            Ok(canonical) => canonical,
            Err(_) if !whitelisted => return Err(not_whitelisted(reference)),
            Err(e) => return Err(io_error(reference, e)),
        };
        let resolved = self
            .root
            .ensure_within(reference, &canonical)
            .map_err(|e| path_error(reference, e))?;

        let metadata = tokio::fs::metadata(&resolved.absolute)
            .await
            .map_err(|e| io_error(reference, e))?;
        if metadata.is_dir() {
            return self.list_directory(reference, &resolved).await;
        }
        self.load_file(reference, &resolved, metadata.len()).await
    }

    async fn load_file(
        &self,
        reference: &str,
        resolved: &ResolvedPath,
        size: u64,
    ) -> Result<ContextItem, ReferenceError> {
        // Checked again on the canonical path: a whitelisted link may point
        // at a file that is not.
        if !self.whitelist.is_allowed(&resolved.relative) {
            return Err(not_whitelisted(reference));
        }
        if !has_allowed_extension(&resolved.absolute, &self.allowed_extensions) {
            return Err(ReferenceError::UnsupportedContent {
                reference: reference.into(),
                reason: "file extension is not in the allow-list".into(),
            });
        }

        let oversized = size > self.max_file_size;
        if oversized && !self.truncate_oversized {
            return Err(ReferenceError::ContentTooLarge {
                reference: reference.into(),
                size,
                max_size: self.max_file_size,
            });
        }

        let bytes = if oversized {
            // A few bytes past the limit so the cut can find a char boundary.
            read_prefix(&resolved.absolute, self.max_file_size + 4)
                .await
                .map_err(|e| io_error(reference, e))?
        } else {
            tokio::fs::read(&resolved.absolute)
                .await
                .map_err(|e| io_error(reference, e))?
        };
        if looks_binary(&bytes) {
            return Err(ReferenceError::UnsupportedContent {
                reference: reference.into(),
                reason: "binary content".into(),
            });
        }

        let limit = usize::try_from(self.max_file_size).unwrap_or(usize::MAX);
        let kept = truncate_utf8(&bytes, limit);
        let text = std::str::from_utf8(kept).map_err(|_| ReferenceError::UnsupportedContent {
            reference: reference.into(),
            reason: "content is not valid UTF-8".into(),
        })?;

        let truncated = kept.len() < bytes.len();
        if truncated {
            debug!(
                reference = %reference,
                size,
                kept = kept.len(),
                "Oversized file truncated"
            );
        }

        let mut item = ContextItem::new(
            resolved.relative.clone(),
            text,
            SourceKind::PathReference,
            self.priority,
            self.counter.count(text),
        )
        .with_citation(resolved.relative.clone());
        item.truncated = truncated;
        Ok(item)
    }

    /// Listing of whitelisted files under a directory, sorted by path.
    /// Hidden entries (`.git`, `.venv`, ...) are not descended into.
    async fn list_directory(
        &self,
        reference: &str,
        resolved: &ResolvedPath,
    ) -> Result<ContextItem, ReferenceError> {
        let mut files: Vec<(String, u64)> = Vec::new();
        let mut pending = vec![resolved.absolute.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir)
                .await
                .map_err(|e| io_error(reference, e))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| io_error(reference, e))?
            {
                if entry.file_name().to_string_lossy().starts_with('.') {
                    continue;
                }
                // file_type() does not follow symlinks, so links are skipped.
                let Ok(file_type) = entry.file_type().await else {
                    continue;
                };
                let path = entry.path();
                if file_type.is_dir() {
                    pending.push(path);
                    continue;
                }
                if !file_type.is_file() {
                    continue;
                }
                let Ok(inner) = self.root.ensure_within(reference, &path) else {
                    continue;
                };
                if !self.whitelist.is_allowed(&inner.relative)
                    || !has_allowed_extension(&path, &self.allowed_extensions)
                {
                    continue;
                }
                let size = entry.metadata().await.map(|m| m.len()).unwrap_or(0);
                files.push((inner.relative, size));
            }
        }

        files.sort();
        let total = files.len();
        let shown = total.min(self.max_directory_entries);

        let label = if resolved.relative.is_empty() {
            "./".to_string()
        } else {
            format!("{}/", resolved.relative)
        };
        let mut content = format!("Directory {label} ({total} files)\n");
        for (path, size) in &files[..shown] {
            content.push_str(&format!("- {path} ({size} bytes)\n"));
        }
        if total > shown {
            content.push_str(&format!("... and {} more\n", total - shown));
        }

        let cost = self.counter.count(&content);
        Ok(ContextItem::new(
            label.clone(),
            content,
            SourceKind::PathReference,
            self.priority,
            cost,
        )
        .with_citation(label))
    }
}

fn reference_pattern(marker: char) -> Result<Regex, Error> {
    let pattern = format!(
        r#"(?:^|[\s(\[{{<"'`])(?:{marker})([A-Za-z0-9_\-./]+)"#,
        marker = regex::escape(&marker.to_string())
    );
    Regex::new(&pattern).map_err(|e| Error::config(format!("invalid reference marker: {e}")))
}

async fn read_prefix(path: &Path, limit: u64) -> std::io::Result<Vec<u8>> {
    let file = tokio::fs::File::open(path).await?;
    let mut bytes = Vec::new();
    file.take(limit).read_to_end(&mut bytes).await?;
    Ok(bytes)
}

fn not_whitelisted(reference: &str) -> ReferenceError {
    ReferenceError::SecurityViolation {
        reference: reference.into(),
        reason: "not matched by any whitelist pattern".into(),
    }
}

fn path_error(reference: &str, err: PathValidationError) -> ReferenceError {
    match err {
        PathValidationError::OutsideRoot { .. } => ReferenceError::SecurityViolation {
            reference: reference.into(),
            reason: "path escapes the workspace root".into(),
        },
        PathValidationError::NotFound { .. } => ReferenceError::NotFound(reference.into()),
        PathValidationError::CanonicalizeFailed { reason, .. } => ReferenceError::Io {
            reference: reference.into(),
            reason,
        },
    }
}

fn io_error(reference: &str, err: std::io::Error) -> ReferenceError {
    if err.kind() == std::io::ErrorKind::NotFound {
        ReferenceError::NotFound(reference.into())
    } else {
        ReferenceError::Io {
            reference: reference.into(),
            reason: err.to_string(),
        }
    }
}
