//! Immutable audit action registry.
//!
//! Built once at process start and shared by reference with every service that
//! emits audit records. There is no global registry: a service can only emit
//! actions present in the registry it was constructed with.

use std::collections::HashMap;

use forgeledger_core::{DomainError, DomainResult};

use crate::action::AuditAction;

/// Registry entry for an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredAction {
    pub action: AuditAction,
    /// Human-readable label for audit trails.
    pub label: &'static str,
    /// Metadata keys every record for this action must carry.
    pub required_metadata: &'static [&'static str],
}

/// The set of actions a deployment emits.
#[derive(Debug, Clone)]
pub struct ActionRegistry {
    actions: HashMap<AuditAction, RegisteredAction>,
}

impl ActionRegistry {
    pub fn builder() -> ActionRegistryBuilder {
        ActionRegistryBuilder::default()
    }

    /// Registry with every engine action enabled.
    pub fn standard() -> Self {
        AuditAction::ALL
            .into_iter()
            .fold(Self::builder(), |b, a| b.register(a))
            .build()
    }

    pub fn get(&self, action: AuditAction) -> Option<&RegisteredAction> {
        self.actions.get(&action)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Check that `action` is registered and `metadata` carries its required keys.
    pub fn validate(&self, action: AuditAction, metadata: &serde_json::Value) -> DomainResult<()> {
        let entry = self.actions.get(&action).ok_or_else(|| {
            DomainError::invariant(format!("audit action {action} is not registered"))
        })?;

        for key in entry.required_metadata {
            if metadata.get(key).is_none() {
                return Err(DomainError::invariant(format!(
                    "audit action {action} requires metadata key '{key}'"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ActionRegistryBuilder {
    actions: HashMap<AuditAction, RegisteredAction>,
}

impl ActionRegistryBuilder {
    /// Register an action with its default label and required metadata.
    pub fn register(mut self, action: AuditAction) -> Self {
        let (label, required_metadata) = defaults(action);
        self.actions.insert(
            action,
            RegisteredAction {
                action,
                label,
                required_metadata,
            },
        );
        self
    }

    pub fn build(self) -> ActionRegistry {
        ActionRegistry {
            actions: self.actions,
        }
    }
}

fn defaults(action: AuditAction) -> (&'static str, &'static [&'static str]) {
    match action {
        AuditAction::JournalEntryPost => ("Journal entry posted", &["lines"]),
        AuditAction::JournalEntryReverse => ("Journal entry reversed", &["reverses"]),
        AuditAction::SalesDocPost => ("Sales document posted", &["journalEntryId"]),
        AuditAction::PurchaseDocPost => ("Purchase document posted", &["journalEntryId"]),
        AuditAction::PaymentPost => ("Payment posted", &["journalEntryId"]),
        AuditAction::PaymentVoid => ("Payment voided", &["previousStatus"]),
        AuditAction::PaymentAllocate => ("Payment allocated", &["allocations", "paymentRemaining"]),
        AuditAction::PaymentUnallocate => ("Payment allocation released", &["allocationIds"]),
        AuditAction::FulfillmentReserve => ("Stock reserved", &["quantity", "transactionSetId"]),
        AuditAction::FulfillmentShip => ("Stock shipped", &["quantity", "transactionSetId"]),
        AuditAction::FulfillmentUnreserve => ("Reservation released", &["quantity", "transactionSetId"]),
        AuditAction::FulfillmentReturn => ("Stock returned", &["quantity", "transactionSetId"]),
        AuditAction::InventoryTransfer => ("Stock transferred", &["quantity", "transactionSetId"]),
        AuditAction::InventoryReceive => ("Stock received", &["quantity", "transactionSetId"]),
    }
}
