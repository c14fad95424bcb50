//! Payments module: receivable/payable documents, payments and allocations.
//!
//! Pure domain logic only. Conservation rules are evaluated over the figures
//! the caller loaded under lock; this crate never reads or writes storage.

pub mod allocation;
pub mod document;
pub mod payment;

pub use allocation::{
    AllocationPlan, AllocationRequest, AllocationTarget, PaymentAllocation, TargetPosition,
    plan_allocations,
};
pub use document::{Document, DocumentKind, DocumentStatus, DocumentType};
pub use payment::{Payment, PaymentKind, PaymentStatus, VoidPlan};
