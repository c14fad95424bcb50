//! Audit events emitted by the ledger engine.
//!
//! Every state-changing engine operation produces exactly one [`AuditRecord`].
//! Records are written inside the operation's transaction and, once committed,
//! handed to an [`AuditSink`] for downstream consumers.

pub mod action;
pub mod in_memory_sink;
pub mod record;
pub mod registry;
pub mod sink;

pub use action::{AuditAction, AuditEntity, AuditVerb};
pub use in_memory_sink::InMemoryAuditSink;
pub use record::AuditRecord;
pub use registry::{ActionRegistry, ActionRegistryBuilder, RegisteredAction};
pub use sink::{AuditSink, AuditSinkError, Subscription, TracingAuditSink};
