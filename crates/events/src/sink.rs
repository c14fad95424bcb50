//! Post-commit audit distribution.
//!
//! Audit rows are durable once the engine transaction commits. A sink receives
//! each committed record afterwards for downstream consumers (notification,
//! export, log shipping). Delivery is at-least-once from the engine's side and
//! a sink failure never undoes the committed operation.

use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use forgeledger_core::TenantScoped;

use crate::record::AuditRecord;

#[derive(Debug, Error)]
pub enum AuditSinkError {
    /// Internal lock poisoning.
    #[error("audit sink poisoned")]
    Poisoned,

    #[error("audit sink unavailable: {0}")]
    Unavailable(String),
}

/// A subscription to committed audit records.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, std::sync::mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, std::sync::mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

/// Receives audit records after the enclosing transaction committed.
pub trait AuditSink: Send + Sync {
    fn publish(&self, record: &AuditRecord) -> Result<(), AuditSinkError>;
}

impl<S> AuditSink for Arc<S>
where
    S: AuditSink + ?Sized,
{
    fn publish(&self, record: &AuditRecord) -> Result<(), AuditSinkError> {
        (**self).publish(record)
    }
}

/// Sink that writes each record to the tracing pipeline.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn publish(&self, record: &AuditRecord) -> Result<(), AuditSinkError> {
        tracing::info!(
            target: "forgeledger::audit",
            audit_id = %record.id(),
            tenant_id = %record.tenant_id(),
            actor_id = %record.actor_id(),
            action = %record.action(),
            entity_id = %record.entity_id(),
            metadata = %record.metadata(),
            "audit"
        );
        Ok(())
    }
}
