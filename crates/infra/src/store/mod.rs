//! Transactional storage boundary for the engine.
//!
//! A [`StoreTx`] is one database transaction. Every engine operation runs its
//! reads, locks and writes on a single `StoreTx` and commits it at the end;
//! dropping it without committing rolls everything back.
//!
//! All lookups are tenant-scoped. A row owned by another tenant is reported as
//! absent, exactly like a row that does not exist.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use forgeledger_accounting::{Account, JournalEntry};
use forgeledger_core::{
    DocumentId, JournalEntryId, LineId, PaymentId, TenantId, TransactionSetId,
};
use forgeledger_events::AuditRecord;
use forgeledger_inventory::{
    BalanceKey, InventoryBalance, InventoryMovement, InventoryTransfer, SalesDocLine,
    SalesFulfillment, TransactionSet,
};
use forgeledger_payments::{AllocationTarget, Document, DocumentKind, Payment, PaymentAllocation};

use crate::error::StoreError;

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryEngineStore;
pub use postgres::PostgresEngineStore;

/// Whether a read takes the row lock (`SELECT ... FOR UPDATE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowLock {
    ForUpdate,
    None,
}

#[async_trait]
pub trait EngineStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError>;
}

#[async_trait]
pub trait StoreTx: Send {
    // chart of accounts
    async fn account(&mut self, tenant_id: TenantId, code: &str) -> Result<Option<Account>, StoreError>;

    // documents and payments
    async fn document(
        &mut self,
        tenant_id: TenantId,
        kind: DocumentKind,
        id: DocumentId,
        lock: RowLock,
    ) -> Result<Option<Document>, StoreError>;
    async fn update_document(&mut self, document: &Document) -> Result<(), StoreError>;
    async fn payment(
        &mut self,
        tenant_id: TenantId,
        id: PaymentId,
        lock: RowLock,
    ) -> Result<Option<Payment>, StoreError>;
    async fn update_payment(&mut self, payment: &Payment) -> Result<(), StoreError>;

    // journal
    async fn insert_journal_entry(&mut self, entry: &JournalEntry) -> Result<(), StoreError>;
    async fn journal_entry(
        &mut self,
        tenant_id: TenantId,
        id: JournalEntryId,
    ) -> Result<Option<JournalEntry>, StoreError>;
    /// The entry that reverses `id`, if one was posted.
    async fn reversal_of(
        &mut self,
        tenant_id: TenantId,
        id: JournalEntryId,
    ) -> Result<Option<JournalEntry>, StoreError>;

    // allocations
    /// All allocation rows of a payment, released ones included, oldest first.
    async fn allocations_for_payment(
        &mut self,
        tenant_id: TenantId,
        payment_id: PaymentId,
    ) -> Result<Vec<PaymentAllocation>, StoreError>;
    /// Sum of non-zero allocations to `target` across every payment, drafts included.
    async fn allocated_to_document(
        &mut self,
        tenant_id: TenantId,
        target: AllocationTarget,
    ) -> Result<Decimal, StoreError>;
    async fn insert_allocation(&mut self, allocation: &PaymentAllocation) -> Result<(), StoreError>;
    async fn update_allocation(&mut self, allocation: &PaymentAllocation) -> Result<(), StoreError>;

    // fulfillment
    async fn sales_line(
        &mut self,
        tenant_id: TenantId,
        document_id: DocumentId,
        line_id: LineId,
        lock: RowLock,
    ) -> Result<Option<SalesDocLine>, StoreError>;
    /// Fulfillment rows of a line in creation order.
    async fn fulfillments_for_line(
        &mut self,
        tenant_id: TenantId,
        line_id: LineId,
    ) -> Result<Vec<SalesFulfillment>, StoreError>;
    async fn insert_fulfillment(&mut self, fulfillment: &SalesFulfillment) -> Result<(), StoreError>;

    // stock
    async fn balance(
        &mut self,
        key: &BalanceKey,
        lock: RowLock,
    ) -> Result<Option<InventoryBalance>, StoreError>;
    /// Lock the balance row, creating a zero row first when none exists.
    async fn lock_or_create_balance(&mut self, key: &BalanceKey) -> Result<InventoryBalance, StoreError>;
    async fn update_balance(&mut self, balance: &InventoryBalance) -> Result<(), StoreError>;
    async fn insert_movement(&mut self, movement: &InventoryMovement) -> Result<(), StoreError>;
    async fn insert_transfer(&mut self, transfer: &InventoryTransfer) -> Result<(), StoreError>;

    // transaction sets
    async fn insert_transaction_set(&mut self, set: &TransactionSet) -> Result<(), StoreError>;
    async fn transaction_set(
        &mut self,
        tenant_id: TenantId,
        id: TransactionSetId,
        lock: RowLock,
    ) -> Result<Option<TransactionSet>, StoreError>;
    async fn transaction_set_by_key(
        &mut self,
        tenant_id: TenantId,
        idempotency_key: &str,
        lock: RowLock,
    ) -> Result<Option<TransactionSet>, StoreError>;
    async fn update_transaction_set(&mut self, set: &TransactionSet) -> Result<(), StoreError>;
    /// Remove a set that is still draft. Returns whether a row was removed.
    async fn delete_draft_transaction_set(
        &mut self,
        tenant_id: TenantId,
        id: TransactionSetId,
    ) -> Result<bool, StoreError>;
    /// Draft sets created before `cutoff`, across all tenants, oldest first.
    async fn draft_transaction_sets_before(
        &mut self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<TransactionSet>, StoreError>;

    // audit
    async fn insert_audit(&mut self, record: &AuditRecord) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
