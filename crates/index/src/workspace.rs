//! Workspace indexing: fill a [`ChunkIndex`] from files under the
//! workspace root.
//!
//! A file is indexed when it:
//! - sits under the root, outside hidden (`.git`, `.venv`, ...) and build
//!   or dependency directories (`target`, `node_modules`, ...)
//! - matches the path whitelist and the extension allow-list
//! - is non-empty, within `max_file_size`, not binary and valid UTF-8
//!
//! Documents are keyed by their workspace-relative path. Re-indexing a file
//! whose content hash is unchanged does nothing, so `index_workspace` can
//! run repeatedly and only pays for what changed.

use std::path::{Path, PathBuf};

use ctxpack_config::ContextConfig;
use ctxpack_core::{Error, IndexError};
use ctxpack_security::{PathWhitelist, WorkspaceRoot, has_allowed_extension, looks_binary};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::index::{ChunkIndex, content_hash};

/// Directory names never descended into, besides hidden ones.
pub const DEFAULT_IGNORED_DIRS: &[&str] = &[
    "node_modules",
    "target",
    "build",
    "dist",
    "out",
    "venv",
    "env",
    "__pycache__",
    "htmlcov",
    "logs",
];

/// A file found by [`WorkspaceIndexer::scan_files`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkspaceFile {
    pub relative_path: String,
    pub size: u64,
}

/// What [`WorkspaceIndexer::index_file`] did with one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FileIndexOutcome {
    Indexed { chunks: usize },
    Unchanged,
    Skipped { reason: String },
}

/// Totals for one [`WorkspaceIndexer::index_workspace`] run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkspaceIndexReport {
    pub scanned: usize,
    pub indexed: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
    /// `"{path}: {error}"` for each failed file.
    pub errors: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct WorkspaceIndexer {
    root: WorkspaceRoot,
    whitelist: PathWhitelist,
    allowed_extensions: Vec<String>,
    max_file_size: u64,
    ignored_dirs: Vec<String>,
}

impl WorkspaceIndexer {
    pub fn new(
        root: WorkspaceRoot,
        whitelist: PathWhitelist,
        allowed_extensions: Vec<String>,
        max_file_size: u64,
    ) -> Self {
        Self {
            root,
            whitelist,
            allowed_extensions,
            max_file_size,
            ignored_dirs: DEFAULT_IGNORED_DIRS.iter().map(|d| d.to_string()).collect(),
        }
    }

    /// Indexer over `config.workspace_root`, which must exist, using the
    /// same whitelist, extensions and size limit as path references.
    pub fn from_config(config: &ContextConfig) -> Result<Self, Error> {
        let root = WorkspaceRoot::new(&config.workspace_root)
            .map_err(|e| Error::config(format!("workspace root: {e}")))?;
        let whitelist = PathWhitelist::new(&config.path_whitelist_patterns)
            .map_err(|e| Error::config(e.to_string()))?;
        Ok(Self::new(
            root,
            whitelist,
            config.allowed_extensions.clone(),
            config.max_file_size,
        ))
    }

    /// Replace the directory names that are never descended into.
    pub fn with_ignored_dirs<I, S>(mut self, dirs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignored_dirs = dirs.into_iter().map(Into::into).collect();
        self
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    /// Every indexable file under the root, sorted by relative path.
    /// Unreadable subdirectories are skipped with a warning.
    pub async fn scan_files(&self) -> Result<Vec<WorkspaceFile>, IndexError> {
        let mut files = Vec::new();
        let mut pending: Vec<PathBuf> = vec![self.root.path().to_path_buf()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if dir == self.root.path() => {
                    return Err(IndexError::Storage(format!(
                        "Failed to read workspace root: {e}"
                    )));
                }
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "Skipping unreadable directory");
                    continue;
                }
            };

            loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(dir = %dir.display(), error = %e, "Directory listing interrupted");
                        break;
                    }
                };
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.starts_with('.') {
                    continue;
                }
                // file_type() does not follow symlinks, so links are skipped.
                let Ok(file_type) = entry.file_type().await else {
                    continue;
                };
                let path = entry.path();
                if file_type.is_dir() {
                    if !self.ignored_dirs.iter().any(|d| *d == name) {
                        pending.push(path);
                    }
                    continue;
                }
                if !file_type.is_file() {
                    continue;
                }

                let Ok(resolved) = self.root.ensure_within(&name, &path) else {
                    continue;
                };
                if !self.whitelist.is_allowed(&resolved.relative)
                    || !has_allowed_extension(&path, &self.allowed_extensions)
                {
                    continue;
                }
                let size = entry.metadata().await.map(|m| m.len()).unwrap_or(0);
                if size == 0 || size > self.max_file_size {
                    debug!(path = %resolved.relative, size, "Skipping file by size");
                    continue;
                }
                files.push(WorkspaceFile {
                    relative_path: resolved.relative,
                    size,
                });
            }
        }

        files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        debug!(root = %self.root.path().display(), files = files.len(), "Workspace scanned");
        Ok(files)
    }

    /// Index one workspace-relative file under its relative path.
    ///
    /// Files that fail a policy check are reported as skipped; I/O and
    /// embedding failures are errors.
    pub async fn index_file(
        &self,
        index: &ChunkIndex,
        relative_path: &str,
    ) -> Result<FileIndexOutcome, IndexError> {
        let Ok(candidate) = self.root.confine(relative_path) else {
            return Ok(skipped("path escapes the workspace root"));
        };
        let canonical = tokio::fs::canonicalize(&candidate)
            .await
            .map_err(|e| IndexError::Storage(format!("Failed to open '{relative_path}': {e}")))?;
        let Ok(resolved) = self.root.ensure_within(relative_path, &canonical) else {
            return Ok(skipped("path escapes the workspace root"));
        };
        if !self.whitelist.is_allowed(&resolved.relative) {
            return Ok(skipped("not matched by any whitelist pattern"));
        }
        if !has_allowed_extension(&resolved.absolute, &self.allowed_extensions) {
            return Ok(skipped("file extension is not in the allow-list"));
        }

        let metadata = tokio::fs::metadata(&resolved.absolute)
            .await
            .map_err(|e| IndexError::Storage(format!("Failed to stat '{relative_path}': {e}")))?;
        if !metadata.is_file() {
            return Ok(skipped("not a regular file"));
        }
        if metadata.len() > self.max_file_size {
            return Ok(skipped("file exceeds the size limit"));
        }

        let bytes = tokio::fs::read(&resolved.absolute)
            .await
            .map_err(|e| IndexError::Storage(format!("Failed to read '{relative_path}': {e}")))?;
        if looks_binary(&bytes) {
            return Ok(skipped("binary content"));
        }
        let Ok(text) = String::from_utf8(bytes) else {
            return Ok(skipped("content is not valid UTF-8"));
        };
        if text.trim().is_empty() {
            return Ok(skipped("empty file"));
        }

        let doc_id = resolved.relative;
        let unchanged = index
            .snapshot()
            .document(&doc_id)
            .is_some_and(|record| record.content_hash == content_hash(&text));
        if unchanged {
            return Ok(FileIndexOutcome::Unchanged);
        }

        let chunk_ids = index.add_document(&doc_id, &text).await?;
        Ok(FileIndexOutcome::Indexed {
            chunks: chunk_ids.len(),
        })
    }

    /// Scan the workspace and index every file that changed. A file that
    /// fails is counted and reported; the run continues.
    pub async fn index_workspace(
        &self,
        index: &ChunkIndex,
    ) -> Result<WorkspaceIndexReport, IndexError> {
        let files = self.scan_files().await?;
        let mut report = WorkspaceIndexReport {
            scanned: files.len(),
            ..WorkspaceIndexReport::default()
        };

        for file in &files {
            match self.index_file(index, &file.relative_path).await {
                Ok(FileIndexOutcome::Indexed { .. }) => report.indexed += 1,
                Ok(FileIndexOutcome::Unchanged) => report.unchanged += 1,
                Ok(FileIndexOutcome::Skipped { reason }) => {
                    debug!(path = %file.relative_path, reason = %reason, "File skipped");
                    report.skipped += 1;
                }
                Err(e) => {
                    warn!(path = %file.relative_path, error = %e, "Failed to index file");
                    report.failed += 1;
                    report.errors.push(format!("{}: {e}", file.relative_path));
                }
            }
        }

        info!(
            root = %self.root.path().display(),
            scanned = report.scanned,
            indexed = report.indexed,
            unchanged = report.unchanged,
            skipped = report.skipped,
            failed = report.failed,
            generation = index.generation(),
            "Workspace indexed"
        );
        Ok(report)
    }
}

fn skipped(reason: &str) -> FileIndexOutcome {
    FileIndexOutcome::Skipped {
        reason: reason.to_string(),
    }
}
