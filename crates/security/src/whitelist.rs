//! Glob whitelist for referenced files.
//!
//! Patterns are matched against the workspace-relative path with `/`
//! separators, e.g. `docs/guide.md` against `**/*.md`.

use globset::{Glob, GlobSet, GlobSetBuilder};

#[derive(Debug, thiserror::Error)]
pub enum WhitelistError {
    #[error("Invalid whitelist pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// Compiled set of allowed path patterns.
#[derive(Debug, Clone)]
pub struct PathWhitelist {
    set: GlobSet,
    patterns: Vec<String>,
}

impl PathWhitelist {
    pub fn new(patterns: &[String]) -> Result<Self, WhitelistError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let glob = Glob::new(pattern).map_err(|e| WhitelistError::InvalidPattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?;
            builder.add(glob);
        }
        let set = builder.build().map_err(|e| WhitelistError::InvalidPattern {
            pattern: patterns.join(", "),
            reason: e.to_string(),
        })?;

        Ok(Self {
            set,
            patterns: patterns.to_vec(),
        })
    }

    /// Whether a workspace-relative path matches any pattern.
    ///
    /// An empty whitelist allows nothing.
    pub fn is_allowed(&self, relative: &str) -> bool {
        self.set.is_match(relative)
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}
