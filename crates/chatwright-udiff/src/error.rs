//! Error types for patch application.

use thiserror::Error;

/// Errors that can occur while applying a patch to file content.
///
/// Both variants abort the whole apply call for that one file; partially
/// patched content is never returned.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PatchError {
    /// An edit block's expected content does not appear in the original
    /// file at or after the current match cursor.
    #[error("search block not found in original content. Expected to find:\n{expected}")]
    SearchBlockNotFound {
        /// The (normalized) text the applier searched for
        expected: String,
    },

    /// A block resolved to a position before an earlier block's already
    /// matched content.
    #[error("patch blocks out of order: block at line {found} precedes already matched content ending at line {cursor}")]
    OrderingViolation {
        /// Line the offending block would occupy
        found: usize,
        /// Line just past the previously matched block
        cursor: usize,
    },
}

/// Result type for patch application.
pub type Result<T> = std::result::Result<T, PatchError>;
