//! Security policies for ctxpack — keep `@path` references inside the
//! workspace and limited to whitelisted text files.
//!
//! Provides:
//! - **Path confinement**: lexical and canonical checks against the workspace root
//! - **Whitelist**: glob patterns a referenced file must match
//! - **Content checks**: extension allow-list, binary sniffing, UTF-8 safe truncation

pub mod content;
pub mod path;
pub mod whitelist;

pub use content::{has_allowed_extension, looks_binary, truncate_utf8};
pub use path::{PathValidationError, ResolvedPath, WorkspaceRoot, normalize_reference};
pub use whitelist::{PathWhitelist, WhitelistError};
