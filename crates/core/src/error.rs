//! Domain error model.
//!
//! Mirrors the engine's failure taxonomy: validation failures are raised before
//! any write, conflicts carry the current values so a caller can decide whether
//! to retry, and missing (or foreign-tenant) rows are reported as not found.
//! Idempotent no-ops are successes and never appear here.

use rust_decimal::Decimal;
use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// invariants, conflicts). Infrastructure concerns belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A precondition about current state was not met.
    #[error("conflict: {0}")]
    Conflict(ConflictReason),

    /// A referenced row does not exist or belongs to another tenant.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

/// Why a state precondition failed, with the values observed at check time.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConflictReason {
    #[error("insufficient {field}: available {available}, requested {requested}")]
    InsufficientQuantity {
        field: &'static str,
        available: Decimal,
        requested: Decimal,
    },

    #[error("{entity} {id} is {current}, expected {expected}")]
    InvalidStatus {
        entity: &'static str,
        id: String,
        current: String,
        expected: String,
    },

    #[error(
        "allocation to {target} exceeds document total: allocated {allocated} of {total}, requested {requested}"
    )]
    AllocationExceedsDocument {
        target: String,
        allocated: Decimal,
        total: Decimal,
        requested: Decimal,
    },

    #[error(
        "allocation exceeds payment {payment}: allocated {allocated} of {amount}, requested {requested}"
    )]
    AllocationExceedsPayment {
        payment: String,
        allocated: Decimal,
        amount: Decimal,
        requested: Decimal,
    },

    #[error("payment {payment} has active allocations totalling {active_total}")]
    OutstandingAllocations { payment: String, active_total: Decimal },

    #[error("line {line} {field} would exceed {limit}: current {current}, requested {requested}")]
    LineQuantityExceeded {
        line: String,
        field: &'static str,
        current: Decimal,
        limit: Decimal,
        requested: Decimal,
    },

    #[error("idempotency key {key} was already used for a different request")]
    IdempotencyKeyReused { key: String },

    #[error("transaction set {set} is being driven by another request")]
    TransactionSetInFlight { set: String },

    #[error("{0}")]
    Other(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(reason: ConflictReason) -> Self {
        Self::Conflict(reason)
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn invalid_status(
        entity: &'static str,
        id: impl ToString,
        current: impl core::fmt::Debug,
        expected: impl Into<String>,
    ) -> Self {
        Self::Conflict(ConflictReason::InvalidStatus {
            entity,
            id: id.to_string(),
            current: format!("{current:?}").to_lowercase(),
            expected: expected.into(),
        })
    }

    pub fn insufficient(field: &'static str, available: Decimal, requested: Decimal) -> Self {
        Self::Conflict(ConflictReason::InsufficientQuantity {
            field,
            available,
            requested,
        })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
