//! Status lifecycles as explicit state machines.

use crate::error::{DomainError, DomainResult};

/// A status enum with a closed set of legal transitions.
///
/// Entities never compare status strings ad hoc; every status change goes
/// through [`Lifecycle::transition`], which rejects illegal moves as a conflict
/// carrying the current state.
pub trait Lifecycle: Copy + Eq + core::fmt::Debug {
    /// Entity name used in conflict reports.
    const ENTITY: &'static str;

    /// Whether `self -> next` is a legal transition.
    fn can_transition_to(self, next: Self) -> bool;

    /// Validate and perform `self -> next`.
    fn transition(self, id: impl ToString, next: Self) -> DomainResult<Self> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(DomainError::invalid_status(
                Self::ENTITY,
                id,
                self,
                format!("a status that can move to {}", format!("{next:?}").to_lowercase()),
            ))
        }
    }
}
