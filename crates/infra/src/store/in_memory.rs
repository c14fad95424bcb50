//! In-memory engine store for tests and local runs.
//!
//! One mutex guards the whole state. A transaction holds the lock from `begin`
//! until it is committed or dropped and works on a private copy, so
//! transactions are fully serialized and a dropped transaction leaves no trace.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};

use forgeledger_accounting::{Account, JournalEntry};
use forgeledger_core::{
    DocumentId, Entity, JournalEntryId, LineId, PaymentId, TenantId, TenantScoped,
    TransactionSetId,
};
use forgeledger_events::AuditRecord;
use forgeledger_inventory::{
    BalanceKey, InventoryBalance, InventoryMovement, InventoryTransfer, SalesDocLine,
    SalesFulfillment, TransactionSet,
};
use forgeledger_payments::{AllocationTarget, Document, DocumentKind, Payment, PaymentAllocation};

use super::{EngineStore, RowLock, StoreTx};
use crate::error::StoreError;

#[derive(Debug, Clone, Default)]
struct State {
    accounts: HashMap<(TenantId, String), Account>,
    documents: HashMap<DocumentId, Document>,
    payments: HashMap<PaymentId, Payment>,
    journal_entries: Vec<JournalEntry>,
    allocations: Vec<PaymentAllocation>,
    lines: HashMap<LineId, SalesDocLine>,
    fulfillments: Vec<SalesFulfillment>,
    balances: HashMap<BalanceKey, InventoryBalance>,
    movements: Vec<InventoryMovement>,
    transfers: Vec<InventoryTransfer>,
    transaction_sets: Vec<TransactionSet>,
    audit: Vec<AuditRecord>,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryEngineStore {
    state: Arc<Mutex<State>>,
    fail_next_movement_commit: Arc<AtomicBool>,
}

impl InMemoryEngineStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next commit of a transaction that wrote a movement fail, as if
    /// the process died between the draft and posted steps of its set.
    pub fn fail_next_movement_commit(&self) {
        self.fail_next_movement_commit.store(true, Ordering::SeqCst);
    }

    pub async fn seed_account(&self, account: Account) {
        let mut state = self.state.lock().await;
        state
            .accounts
            .insert((account.tenant_id, account.code.clone()), account);
    }

    pub async fn seed_document(&self, document: Document) {
        self.state.lock().await.documents.insert(document.id, document);
    }

    pub async fn seed_payment(&self, payment: Payment) {
        self.state.lock().await.payments.insert(payment.id, payment);
    }

    pub async fn seed_line(&self, line: SalesDocLine) {
        self.state.lock().await.lines.insert(line.id, line);
    }

    pub async fn seed_balance(&self, balance: InventoryBalance) {
        self.state.lock().await.balances.insert(*balance.key(), balance);
    }

    pub async fn document(&self, id: DocumentId) -> Option<Document> {
        self.state.lock().await.documents.get(&id).cloned()
    }

    pub async fn payment(&self, id: PaymentId) -> Option<Payment> {
        self.state.lock().await.payments.get(&id).cloned()
    }

    pub async fn balance(&self, key: &BalanceKey) -> Option<InventoryBalance> {
        self.state.lock().await.balances.get(key).cloned()
    }

    pub async fn balances(&self) -> Vec<InventoryBalance> {
        self.state.lock().await.balances.values().cloned().collect()
    }

    pub async fn journal_entries(&self, tenant_id: TenantId) -> Vec<JournalEntry> {
        owned_by(&self.state.lock().await.journal_entries, tenant_id)
    }

    pub async fn allocations(&self, tenant_id: TenantId) -> Vec<PaymentAllocation> {
        owned_by(&self.state.lock().await.allocations, tenant_id)
    }

    pub async fn movements(&self, tenant_id: TenantId) -> Vec<InventoryMovement> {
        owned_by(&self.state.lock().await.movements, tenant_id)
    }

    pub async fn fulfillments(&self, tenant_id: TenantId) -> Vec<SalesFulfillment> {
        owned_by(&self.state.lock().await.fulfillments, tenant_id)
    }

    pub async fn transfers(&self, tenant_id: TenantId) -> Vec<InventoryTransfer> {
        owned_by(&self.state.lock().await.transfers, tenant_id)
    }

    pub async fn transaction_sets(&self, tenant_id: TenantId) -> Vec<TransactionSet> {
        owned_by(&self.state.lock().await.transaction_sets, tenant_id)
    }

    pub async fn audit_records(&self, tenant_id: TenantId) -> Vec<AuditRecord> {
        owned_by(&self.state.lock().await.audit, tenant_id)
    }
}

fn owned_by<T: TenantScoped + Clone>(rows: &[T], tenant_id: TenantId) -> Vec<T> {
    rows.iter()
        .filter(|r| r.tenant_id() == tenant_id)
        .cloned()
        .collect()
}

#[async_trait]
impl EngineStore for InMemoryEngineStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(InMemoryTx {
            guard,
            working,
            wrote_movement: false,
            fail_next_movement_commit: self.fail_next_movement_commit.clone(),
        }))
    }
}

struct InMemoryTx {
    guard: OwnedMutexGuard<State>,
    working: State,
    wrote_movement: bool,
    fail_next_movement_commit: Arc<AtomicBool>,
}

fn missing<E: Entity>(id: &E::Id) -> StoreError {
    StoreError::Backend(format!("{} {id} does not exist", E::NAME))
}

#[async_trait]
impl StoreTx for InMemoryTx {
    async fn account(&mut self, tenant_id: TenantId, code: &str) -> Result<Option<Account>, StoreError> {
        Ok(self
            .working
            .accounts
            .get(&(tenant_id, code.to_string()))
            .cloned())
    }

    async fn document(
        &mut self,
        tenant_id: TenantId,
        kind: DocumentKind,
        id: DocumentId,
        _lock: RowLock,
    ) -> Result<Option<Document>, StoreError> {
        Ok(self
            .working
            .documents
            .get(&id)
            .filter(|d| d.tenant_id == tenant_id && d.kind == kind)
            .cloned())
    }

    async fn update_document(&mut self, document: &Document) -> Result<(), StoreError> {
        let slot = self
            .working
            .documents
            .get_mut(&document.id)
            .filter(|d| d.tenant_id == document.tenant_id)
            .ok_or_else(|| missing::<Document>(&document.id))?;
        *slot = document.clone();
        Ok(())
    }

    async fn payment(
        &mut self,
        tenant_id: TenantId,
        id: PaymentId,
        _lock: RowLock,
    ) -> Result<Option<Payment>, StoreError> {
        Ok(self
            .working
            .payments
            .get(&id)
            .filter(|p| p.tenant_id == tenant_id)
            .cloned())
    }

    async fn update_payment(&mut self, payment: &Payment) -> Result<(), StoreError> {
        let slot = self
            .working
            .payments
            .get_mut(&payment.id)
            .filter(|p| p.tenant_id == payment.tenant_id)
            .ok_or_else(|| missing::<Payment>(&payment.id))?;
        *slot = payment.clone();
        Ok(())
    }

    async fn insert_journal_entry(&mut self, entry: &JournalEntry) -> Result<(), StoreError> {
        let entries = &self.working.journal_entries;
        if entries.iter().any(|e| e.id_typed() == entry.id_typed()) {
            return Err(StoreError::Conflict(format!(
                "journal entry {} already exists",
                entry.id_typed()
            )));
        }
        if let Some(original) = entry.reverses() {
            if entries.iter().any(|e| e.reverses() == Some(original)) {
                return Err(StoreError::Conflict(format!(
                    "journal entry {original} is already reversed"
                )));
            }
        }
        self.working.journal_entries.push(entry.clone());
        Ok(())
    }

    async fn journal_entry(
        &mut self,
        tenant_id: TenantId,
        id: JournalEntryId,
    ) -> Result<Option<JournalEntry>, StoreError> {
        Ok(self
            .working
            .journal_entries
            .iter()
            .find(|e| e.id_typed() == id && e.tenant_id() == tenant_id)
            .cloned())
    }

    async fn reversal_of(
        &mut self,
        tenant_id: TenantId,
        id: JournalEntryId,
    ) -> Result<Option<JournalEntry>, StoreError> {
        Ok(self
            .working
            .journal_entries
            .iter()
            .find(|e| e.reverses() == Some(id) && e.tenant_id() == tenant_id)
            .cloned())
    }

    async fn allocations_for_payment(
        &mut self,
        tenant_id: TenantId,
        payment_id: PaymentId,
    ) -> Result<Vec<PaymentAllocation>, StoreError> {
        Ok(self
            .working
            .allocations
            .iter()
            .filter(|a| a.tenant_id == tenant_id && a.payment_id == payment_id)
            .cloned()
            .collect())
    }

    async fn allocated_to_document(
        &mut self,
        tenant_id: TenantId,
        target: AllocationTarget,
    ) -> Result<Decimal, StoreError> {
        Ok(PaymentAllocation::active_total(
            self.working
                .allocations
                .iter()
                .filter(|a| a.tenant_id == tenant_id && a.target == target),
        ))
    }

    async fn insert_allocation(&mut self, allocation: &PaymentAllocation) -> Result<(), StoreError> {
        self.working.allocations.push(allocation.clone());
        Ok(())
    }

    async fn update_allocation(&mut self, allocation: &PaymentAllocation) -> Result<(), StoreError> {
        let slot = self
            .working
            .allocations
            .iter_mut()
            .find(|a| a.id == allocation.id && a.tenant_id == allocation.tenant_id)
            .ok_or_else(|| missing::<PaymentAllocation>(&allocation.id))?;
        *slot = allocation.clone();
        Ok(())
    }

    async fn sales_line(
        &mut self,
        tenant_id: TenantId,
        document_id: DocumentId,
        line_id: LineId,
        _lock: RowLock,
    ) -> Result<Option<SalesDocLine>, StoreError> {
        Ok(self
            .working
            .lines
            .get(&line_id)
            .filter(|l| l.tenant_id == tenant_id && l.document_id == document_id)
            .cloned())
    }

    async fn fulfillments_for_line(
        &mut self,
        tenant_id: TenantId,
        line_id: LineId,
    ) -> Result<Vec<SalesFulfillment>, StoreError> {
        Ok(self
            .working
            .fulfillments
            .iter()
            .filter(|f| f.tenant_id == tenant_id && f.line_id == line_id)
            .cloned()
            .collect())
    }

    async fn insert_fulfillment(&mut self, fulfillment: &SalesFulfillment) -> Result<(), StoreError> {
        self.working.fulfillments.push(fulfillment.clone());
        Ok(())
    }

    async fn balance(
        &mut self,
        key: &BalanceKey,
        _lock: RowLock,
    ) -> Result<Option<InventoryBalance>, StoreError> {
        Ok(self.working.balances.get(key).cloned())
    }

    async fn lock_or_create_balance(&mut self, key: &BalanceKey) -> Result<InventoryBalance, StoreError> {
        Ok(self
            .working
            .balances
            .entry(*key)
            .or_insert_with(|| InventoryBalance::empty(*key))
            .clone())
    }

    async fn update_balance(&mut self, balance: &InventoryBalance) -> Result<(), StoreError> {
        if !balance.is_consistent() {
            return Err(StoreError::Backend(format!(
                "balance {} violates the balance check",
                balance.key()
            )));
        }
        self.working.balances.insert(*balance.key(), balance.clone());
        Ok(())
    }

    async fn insert_movement(&mut self, movement: &InventoryMovement) -> Result<(), StoreError> {
        self.wrote_movement = true;
        self.working.movements.push(movement.clone());
        Ok(())
    }

    async fn insert_transfer(&mut self, transfer: &InventoryTransfer) -> Result<(), StoreError> {
        self.working.transfers.push(transfer.clone());
        Ok(())
    }

    async fn insert_transaction_set(&mut self, set: &TransactionSet) -> Result<(), StoreError> {
        if let Some(key) = &set.idempotency_key {
            let taken = self.working.transaction_sets.iter().any(|s| {
                s.tenant_id == set.tenant_id && s.idempotency_key.as_deref() == Some(key.as_str())
            });
            if taken {
                return Err(StoreError::Conflict(format!(
                    "idempotency key {key} already has a transaction set"
                )));
            }
        }
        self.working.transaction_sets.push(set.clone());
        Ok(())
    }

    async fn transaction_set(
        &mut self,
        tenant_id: TenantId,
        id: TransactionSetId,
        _lock: RowLock,
    ) -> Result<Option<TransactionSet>, StoreError> {
        Ok(self
            .working
            .transaction_sets
            .iter()
            .find(|s| s.id == id && s.tenant_id == tenant_id)
            .cloned())
    }

    async fn transaction_set_by_key(
        &mut self,
        tenant_id: TenantId,
        idempotency_key: &str,
        _lock: RowLock,
    ) -> Result<Option<TransactionSet>, StoreError> {
        Ok(self
            .working
            .transaction_sets
            .iter()
            .find(|s| s.tenant_id == tenant_id && s.idempotency_key.as_deref() == Some(idempotency_key))
            .cloned())
    }

    async fn update_transaction_set(&mut self, set: &TransactionSet) -> Result<(), StoreError> {
        let slot = self
            .working
            .transaction_sets
            .iter_mut()
            .find(|s| s.id == set.id && s.tenant_id == set.tenant_id)
            .ok_or_else(|| missing::<TransactionSet>(&set.id))?;
        *slot = set.clone();
        Ok(())
    }

    async fn delete_draft_transaction_set(
        &mut self,
        tenant_id: TenantId,
        id: TransactionSetId,
    ) -> Result<bool, StoreError> {
        let before = self.working.transaction_sets.len();
        self.working
            .transaction_sets
            .retain(|s| !(s.id == id && s.tenant_id == tenant_id && s.is_draft()));
        Ok(self.working.transaction_sets.len() < before)
    }

    async fn draft_transaction_sets_before(
        &mut self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<TransactionSet>, StoreError> {
        let mut sets: Vec<TransactionSet> = self
            .working
            .transaction_sets
            .iter()
            .filter(|s| s.is_draft() && s.created_at < cutoff)
            .cloned()
            .collect();
        sets.sort_by_key(|s| s.created_at);
        Ok(sets)
    }

    async fn insert_audit(&mut self, record: &AuditRecord) -> Result<(), StoreError> {
        self.working.audit.push(record.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let InMemoryTx {
            mut guard,
            working,
            wrote_movement,
            fail_next_movement_commit,
        } = *self;

        if wrote_movement && fail_next_movement_commit.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Backend("simulated failure at commit".to_string()));
        }
        *guard = working;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forgeledger_core::{ProductId, WarehouseId};

    fn key(tenant_id: TenantId) -> BalanceKey {
        BalanceKey::new(tenant_id, ProductId::new(), WarehouseId::new())
    }

    #[tokio::test]
    async fn dropped_transaction_leaves_no_trace() {
        let store = InMemoryEngineStore::new();
        let key = key(TenantId::new());

        {
            let mut tx = store.begin().await.unwrap();
            let mut balance = tx.lock_or_create_balance(&key).await.unwrap();
            balance.receive(Decimal::TEN).unwrap();
            tx.update_balance(&balance).await.unwrap();
        }

        assert!(store.balance(&key).await.is_none());
    }

    #[tokio::test]
    async fn committed_transaction_is_visible() {
        let store = InMemoryEngineStore::new();
        let key = key(TenantId::new());

        let mut tx = store.begin().await.unwrap();
        let mut balance = tx.lock_or_create_balance(&key).await.unwrap();
        balance.receive(Decimal::TEN).unwrap();
        tx.update_balance(&balance).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.balance(&key).await.unwrap().on_hand(), Decimal::TEN);
    }

    #[tokio::test]
    async fn foreign_tenant_rows_are_invisible() {
        let store = InMemoryEngineStore::new();
        let owner = TenantId::new();
        let doc = Document {
            id: DocumentId::new(),
            tenant_id: owner,
            kind: DocumentKind::SalesDoc,
            doc_type: forgeledger_payments::DocumentType::Invoice,
            status: forgeledger_payments::DocumentStatus::Open,
            currency: "USD".into(),
            total_amount: Decimal::ONE_HUNDRED,
            tax_amount: Decimal::ZERO,
            party_id: None,
            journal_entry_id: None,
        };
        store.seed_document(doc.clone()).await;

        let mut tx = store.begin().await.unwrap();
        let seen = tx
            .document(TenantId::new(), DocumentKind::SalesDoc, doc.id, RowLock::None)
            .await
            .unwrap();
        assert!(seen.is_none());
        let seen = tx
            .document(owner, DocumentKind::PurchaseDoc, doc.id, RowLock::None)
            .await
            .unwrap();
        assert!(seen.is_none());
    }

    #[tokio::test]
    async fn idempotency_keys_are_unique_per_tenant() {
        let store = InMemoryEngineStore::new();
        let tenant = TenantId::new();
        let open = |tenant_id| {
            TransactionSet::open(
                tenant_id,
                forgeledger_inventory::TransactionSetKind::Receipt,
                Some("k".to_string()),
                "{}".to_string(),
                forgeledger_core::UserId::new(),
                Utc::now(),
            )
        };

        let mut tx = store.begin().await.unwrap();
        tx.insert_transaction_set(&open(tenant)).await.unwrap();
        assert!(matches!(
            tx.insert_transaction_set(&open(tenant)).await,
            Err(StoreError::Conflict(_))
        ));
        tx.insert_transaction_set(&open(TenantId::new())).await.unwrap();
    }
}
