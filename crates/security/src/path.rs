//! Path confinement — keep every referenced path inside the workspace root.
//!
//! A reference is checked twice:
//! 1. Lexically, before touching the filesystem: `..` components that climb
//!    above the root are rejected outright.
//! 2. After canonicalization: symlinks are resolved and the real path must
//!    still sit under the canonical root.
//!
//! A leading `/` in a reference means "relative to the workspace root",
//! never the filesystem root.

use std::path::{Component, Path, PathBuf};

/// Error returned when path validation fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathValidationError {
    #[error("Path '{path}' escapes the workspace root")]
    OutsideRoot { path: String },

    #[error("Path '{path}' does not exist")]
    NotFound { path: String },

    #[error("Failed to canonicalize path '{path}': {reason}")]
    CanonicalizeFailed { path: String, reason: String },
}

/// A path that passed confinement checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    /// Canonical absolute path.
    pub absolute: PathBuf,
    /// Path relative to the workspace root, with `/` separators.
    pub relative: String,
}

/// A canonicalized workspace root that references are confined to.
#[derive(Debug, Clone)]
pub struct WorkspaceRoot {
    root: PathBuf,
}

impl WorkspaceRoot {
    /// Canonicalize `root`. The directory must exist.
    pub fn new(root: &Path) -> Result<Self, PathValidationError> {
        let root = root
            .canonicalize()
            .map_err(|e| PathValidationError::CanonicalizeFailed {
                path: root.display().to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self { root })
    }

    /// Like [`new`](Self::new), but keeps `root` as given when it cannot be
    /// canonicalized. Lexical confinement still applies; lookups under a
    /// missing root simply find nothing.
    pub fn lenient(root: &Path) -> Self {
        Self::new(root).unwrap_or_else(|_| Self {
            root: root.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Join `reference` onto the root without touching the filesystem.
    ///
    /// Fails if any `..` would climb above the root.
    pub fn confine(&self, reference: &str) -> Result<PathBuf, PathValidationError> {
        let relative = normalize_reference(reference)?;
        Ok(self.root.join(relative))
    }

    /// The workspace-relative form of `reference` (`/` separators), computed
    /// without touching the filesystem.
    pub fn lexical_relative(&self, reference: &str) -> Result<String, PathValidationError> {
        normalize_reference(reference).map(|relative| to_slash(&relative))
    }

    /// Check a canonical path against the root and return its relative form.
    pub fn ensure_within(
        &self,
        reference: &str,
        canonical: &Path,
    ) -> Result<ResolvedPath, PathValidationError> {
        let relative = canonical
            .strip_prefix(&self.root)
            .map_err(|_| PathValidationError::OutsideRoot {
                path: reference.into(),
            })?;
        Ok(ResolvedPath {
            absolute: canonical.to_path_buf(),
            relative: to_slash(relative),
        })
    }

    /// Full synchronous resolution: lexical check, canonicalize, re-check.
    pub fn resolve(&self, reference: &str) -> Result<ResolvedPath, PathValidationError> {
        let candidate = self.confine(reference)?;
        let canonical = candidate.canonicalize().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PathValidationError::NotFound {
                    path: reference.into(),
                }
            } else {
                PathValidationError::CanonicalizeFailed {
                    path: reference.into(),
                    reason: e.to_string(),
                }
            }
        })?;
        self.ensure_within(reference, &canonical)
    }
}

/// Lexically normalize a workspace-relative reference.
///
/// Strips leading `/`, drops `.` components and applies `..` against the
/// components seen so far. Climbing above the start is an error.
pub fn normalize_reference(reference: &str) -> Result<PathBuf, PathValidationError> {
    let cleaned = reference.replace('\\', "/");
    let trimmed = cleaned.trim_start_matches('/');

    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
    for component in Path::new(trimmed).components() {
        match component {
            Component::CurDir => {}
            Component::Normal(part) => parts.push(part),
            Component::ParentDir => {
                if parts.pop().is_none() {
                    return Err(PathValidationError::OutsideRoot {
                        path: reference.into(),
                    });
                }
            }
            // Drive prefixes and roots cannot appear in a workspace reference.
            Component::Prefix(_) | Component::RootDir => {
                return Err(PathValidationError::OutsideRoot {
                    path: reference.into(),
                });
            }
        }
    }

    Ok(parts.iter().collect())
}

fn to_slash(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace() -> (tempfile::TempDir, WorkspaceRoot) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("docs")).unwrap();
        std::fs::write(dir.path().join("docs/guide.md"), "# Guide").unwrap();
        let root = WorkspaceRoot::new(dir.path()).unwrap();
        (dir, root)
    }

    #[test]
    fn lexical_relative_uses_forward_slashes() {
        let root = WorkspaceRoot::lenient(Path::new("/proj/ctxpack-missing-root"));
        assert_eq!(root.lexical_relative("/docs/./api/../guide.md").unwrap(), "docs/guide.md");
        assert_eq!(root.lexical_relative("docs\\guide.md").unwrap(), "docs/guide.md");
        assert!(root.lexical_relative("../secret.md").is_err());
    }

    #[test]
    fn normalize_strips_leading_slash_and_dots() {
        assert_eq!(
            normalize_reference("/docs/./guide.md").unwrap(),
            PathBuf::from("docs/guide.md")
        );
        assert_eq!(
            normalize_reference("docs/sub/../guide.md").unwrap(),
            PathBuf::from("docs/guide.md")
        );
    }

    #[test]
    fn path_traversal_blocked() {
        let err = normalize_reference("../../etc/passwd").unwrap_err();
        assert!(matches!(err, PathValidationError::OutsideRoot { .. }));

        let err = normalize_reference("docs/../../secret.txt").unwrap_err();
        assert!(matches!(err, PathValidationError::OutsideRoot { .. }));
    }

    #[test]
    fn traversal_blocked_without_touching_filesystem() {
        let root = WorkspaceRoot::lenient(Path::new("/proj/ctxpack-missing-root"));
        assert_eq!(root.path(), Path::new("/proj/ctxpack-missing-root"));
        let err = root.confine("../../etc/passwd").unwrap_err();
        assert_eq!(
            err,
            PathValidationError::OutsideRoot {
                path: "../../etc/passwd".into()
            }
        );
    }

    #[test]
    fn resolve_existing_file() {
        let (_dir, root) = workspace();
        let resolved = root.resolve("docs/guide.md").unwrap();
        assert_eq!(resolved.relative, "docs/guide.md");
        assert!(resolved.absolute.starts_with(root.path()));

        let resolved = root.resolve("/docs/guide.md").unwrap();
        assert_eq!(resolved.relative, "docs/guide.md");
    }

    #[test]
    fn resolve_missing_file() {
        let (_dir, root) = workspace();
        let err = root.resolve("docs/missing.md").unwrap_err();
        assert!(matches!(err, PathValidationError::NotFound { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_escape_blocked() {
        let (dir, root) = workspace();
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret.md"), "secret").unwrap();
        std::os::unix::fs::symlink(outside.path().join("secret.md"), dir.path().join("docs/link.md"))
            .unwrap();

        let err = root.resolve("docs/link.md").unwrap_err();
        assert!(matches!(err, PathValidationError::OutsideRoot { .. }));
    }
}
