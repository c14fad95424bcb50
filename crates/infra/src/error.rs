//! Engine error model.
//!
//! Domain errors pass through unchanged so callers can match on the taxonomy
//! (validation, conflict, not found). Storage failures are classified so a
//! caller can tell a retryable serialization failure from a broken backend.

use std::time::Duration;

use thiserror::Error;

use forgeledger_core::DomainError;

pub type EngineResult<T> = Result<T, EngineError>;

/// Storage backend failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write (concurrent insert).
    #[error("store conflict: {0}")]
    Conflict(String),

    /// Serialization failure or deadlock; the whole operation may be retried.
    #[error("retryable store failure: {0}")]
    Retryable(String),

    /// A stored row could not be decoded into its domain type.
    #[error("undecodable row: {0}")]
    Decode(String),

    #[error("store backend failure: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The operation exceeded its deadline and its transaction was rolled back.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// The audit record could not be built for a registered action.
    #[error("audit failure: {0}")]
    Audit(String),
}

impl EngineError {
    pub fn domain(&self) -> Option<&DomainError> {
        match self {
            EngineError::Domain(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_conflict(&self) -> bool {
        self.domain().is_some_and(DomainError::is_conflict)
    }

    pub fn is_validation(&self) -> bool {
        self.domain().is_some_and(DomainError::is_validation)
    }

    pub fn is_not_found(&self) -> bool {
        self.domain().is_some_and(DomainError::is_not_found)
    }

    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Timeout { .. } | EngineError::Store(StoreError::Retryable(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_helpers() {
        let conflict = EngineError::from(DomainError::insufficient(
            "available",
            rust_decimal::Decimal::ZERO,
            rust_decimal::Decimal::ONE,
        ));
        assert!(conflict.is_conflict());
        assert!(!conflict.is_retryable());

        let timeout = EngineError::Timeout {
            operation: "fulfill",
            after: Duration::from_millis(5),
        };
        assert!(timeout.is_retryable());
        assert_eq!(timeout.to_string(), "fulfill timed out after 5ms");

        let store = EngineError::from(StoreError::Retryable("40001".into()));
        assert!(store.is_retryable());
        assert!(store.domain().is_none());
    }
}
