//! Engine-boundary error taxonomy.
//!
//! Every variant except `SyncDegraded` is returned synchronously by the
//! lifecycle manager / reconciler and guarantees that neither the order nor
//! the inventory item changed.

use thiserror::Error;

use stockflow_core::DomainError;

use crate::store::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    NotFound,
    InvalidTransition,
    ReconcileConflict,
    SyncDegraded,
    Invariant,
    Store,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Bad input; nothing was written.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Referenced order or product is missing; nothing was written.
    #[error("not found: {0}")]
    NotFound(String),

    /// The state machine does not allow the requested change.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// Transaction retries were exhausted; nothing was written.
    #[error("reconcile conflict after {attempts} attempt(s): {detail}")]
    ReconcileConflict { attempts: u32, detail: String },

    /// Change-feed subscription is failing; projections are being polled.
    #[error("sync degraded: {0}")]
    SyncDegraded(String),

    /// A document broke an invariant (indicates a bug or a foreign writer).
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// Non-retryable (or retry-exhausted transient) storage failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Validation(_) => ErrorKind::Validation,
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::InvalidTransition(_) => ErrorKind::InvalidTransition,
            EngineError::ReconcileConflict { .. } => ErrorKind::ReconcileConflict,
            EngineError::SyncDegraded(_) => ErrorKind::SyncDegraded,
            EngineError::Invariant(_) => ErrorKind::Invariant,
            EngineError::Store(_) => ErrorKind::Store,
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Whether a transaction attempt that failed this way may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Store(e) if e.is_retryable())
    }
}

impl From<DomainError> for EngineError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => EngineError::Validation(msg),
            DomainError::InvalidId(msg) => EngineError::Validation(msg),
            DomainError::NotFound(msg) => EngineError::NotFound(msg),
            DomainError::InvalidTransition(msg) => EngineError::InvalidTransition(msg),
            DomainError::InvariantViolation(msg) => EngineError::Invariant(msg),
            DomainError::Conflict(msg) => EngineError::Store(StoreError::Conflict(msg)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_map_onto_the_taxonomy() {
        assert_eq!(
            EngineError::from(DomainError::validation("x")).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            EngineError::from(DomainError::invalid_transition("x")).kind(),
            ErrorKind::InvalidTransition
        );
        assert_eq!(
            EngineError::from(DomainError::not_found("x")).kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn only_transient_store_errors_are_retryable() {
        assert!(EngineError::Store(StoreError::Conflict("v".into())).is_retryable());
        assert!(EngineError::Store(StoreError::Unavailable("down".into())).is_retryable());
        assert!(!EngineError::Store(StoreError::Duplicate("id".into())).is_retryable());
        assert!(!EngineError::validation("bad").is_retryable());
    }
}
