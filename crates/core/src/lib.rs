//! `forgeledger-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! typed identifiers, the error taxonomy shared by every engine component,
//! decimal tolerances and the status lifecycle contract.

pub mod entity;
pub mod error;
pub mod id;
pub mod lifecycle;
pub mod money;

pub use entity::{Entity, TenantScoped, ensure_tenant};
pub use error::{ConflictReason, DomainError, DomainResult};
pub use id::{
    AllocationId, AuditId, DocumentId, FulfillmentId, JournalEntryId, LineId, LocationId,
    MovementId, PartyId, PaymentId, ProductId, TenantId, TransactionSetId, TransferId, UserId,
    WarehouseId,
};
pub use lifecycle::Lifecycle;
pub use money::{ALLOCATION_TOLERANCE, JOURNAL_BALANCE_TOLERANCE};
