//! Domain error model.

use thiserror::Error;

/// Result type used by the foundation primitives.
pub type DomainResult<T> = Result<T, DomainError>;

/// Foundation-level error.
///
/// Covers failures that are not specific to the warehouse ledger: malformed
/// identifiers, generic validation and version conflicts. The ledger's own
/// taxonomy lives in `cellarledger-warehouse` and converts from this type.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A conflict occurred (e.g. stale version / optimistic concurrency).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }
}
