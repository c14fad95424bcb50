//! In-memory audit sink for tests/dev.

use std::sync::{Mutex, mpsc};

use forgeledger_core::{TenantId, TenantScoped};

use crate::action::AuditAction;
use crate::record::AuditRecord;
use crate::sink::{AuditSink, AuditSinkError, Subscription};

/// Keeps every published record and fans it out to subscribers.
#[derive(Debug, Default)]
pub struct InMemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
    subscribers: Mutex<Vec<mpsc::Sender<AuditRecord>>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn records_for(&self, tenant_id: TenantId) -> Vec<AuditRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.tenant_id() == tenant_id)
            .collect()
    }

    pub fn count(&self, action: AuditAction) -> usize {
        self.records()
            .iter()
            .filter(|r| r.action() == action)
            .count()
    }

    pub fn subscribe(&self) -> Subscription<AuditRecord> {
        let (tx, rx) = mpsc::channel();

        // If the lock is poisoned, we still return a subscription;
        // it just won't receive records.
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(tx);
        }

        Subscription::new(rx)
    }
}

impl AuditSink for InMemoryAuditSink {
    fn publish(&self, record: &AuditRecord) -> Result<(), AuditSinkError> {
        self.records
            .lock()
            .map_err(|_| AuditSinkError::Poisoned)?
            .push(record.clone());

        let mut subs = self.subscribers.lock().map_err(|_| AuditSinkError::Poisoned)?;
        // Drop any dead subscribers while publishing.
        subs.retain(|tx| tx.send(record.clone()).is_ok());

        Ok(())
    }
}
