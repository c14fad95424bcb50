//! Entity traits: identity + tenant ownership.

use crate::error::{DomainError, DomainResult};
use crate::id::TenantId;

/// Entity marker + minimal interface.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug + core::fmt::Display;

    /// Stable entity name used in errors and audit records (e.g. "payment").
    const NAME: &'static str;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}

/// Rows owned by exactly one tenant.
pub trait TenantScoped {
    fn tenant_id(&self) -> TenantId;
}

/// Reject rows that belong to a different tenant.
///
/// Foreign rows are reported as not found so existence never leaks across the
/// tenant boundary.
pub fn ensure_tenant<E>(entity: &E, tenant_id: TenantId) -> DomainResult<()>
where
    E: Entity + TenantScoped,
{
    if entity.tenant_id() != tenant_id {
        return Err(DomainError::not_found(E::NAME, entity.id()));
    }
    Ok(())
}
