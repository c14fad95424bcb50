//! Postgres-backed engine store.
//!
//! Each [`StoreTx`] wraps one sqlx transaction. Rows that an operation
//! mutates are read with `SELECT ... FOR UPDATE`; balance rows that may not
//! exist yet are first materialized with `INSERT ... ON CONFLICT DO NOTHING`
//! and then locked, so two first-time writers cannot both create the row.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (serialization failure) | `40001` | `Retryable` |
//! | Database (deadlock detected) | `40P01` | `Retryable` |
//! | Database (other) | any other | `Backend` |
//! | PoolClosed / Io / other | N/A | `Backend` |

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use forgeledger_accounting::{Account, AccountKind, JournalEntry, JournalLine, SourceKind, SourceRef};
use forgeledger_core::{
    DocumentId, FulfillmentId, JournalEntryId, LineId, MovementId, PartyId, PaymentId,
    ProductId, TenantId, TransactionSetId, UserId, WarehouseId,
};
use forgeledger_events::AuditRecord;
use forgeledger_inventory::{
    BalanceKey, InventoryBalance, InventoryMovement, InventoryTransfer, SalesDocLine,
    SalesFulfillment, TransactionSet,
};
use forgeledger_payments::{
    AllocationTarget, Document, DocumentKind, Payment, PaymentAllocation,
};

use super::{EngineStore, RowLock, StoreTx};
use crate::config::{ConfigError, EngineConfig};
use crate::error::StoreError;

/// Tables owned by the engine, applied in order by [`PostgresEngineStore::ensure_schema`].
pub const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS accounts (
        tenant_id UUID NOT NULL,
        code      TEXT NOT NULL,
        name      TEXT NOT NULL,
        kind      TEXT NOT NULL,
        PRIMARY KEY (tenant_id, code)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS documents (
        id               UUID PRIMARY KEY,
        tenant_id        UUID NOT NULL,
        kind             TEXT NOT NULL,
        doc_type         TEXT NOT NULL,
        status           TEXT NOT NULL,
        currency         TEXT NOT NULL,
        total_amount     NUMERIC(20, 6) NOT NULL CHECK (total_amount >= 0),
        tax_amount       NUMERIC(20, 6) NOT NULL DEFAULT 0,
        party_id         UUID,
        journal_entry_id UUID
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS payments (
        id               UUID PRIMARY KEY,
        tenant_id        UUID NOT NULL,
        kind             TEXT NOT NULL,
        amount           NUMERIC(20, 6) NOT NULL CHECK (amount > 0),
        currency         TEXT NOT NULL,
        status           TEXT NOT NULL,
        party_id         UUID,
        payment_date     DATE NOT NULL,
        journal_entry_id UUID
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS journal_entries (
        id           UUID PRIMARY KEY,
        tenant_id    UUID NOT NULL,
        posting_date DATE NOT NULL,
        entry_date   DATE NOT NULL,
        memo         TEXT,
        source_kind  TEXT,
        source_id    UUID,
        reverses     UUID UNIQUE REFERENCES journal_entries (id),
        posted_at    TIMESTAMPTZ NOT NULL,
        posted_by    UUID NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS journal_lines (
        entry_id     UUID NOT NULL REFERENCES journal_entries (id),
        tenant_id    UUID NOT NULL,
        line_no      INTEGER NOT NULL,
        account_code TEXT NOT NULL,
        debit        NUMERIC(20, 6) NOT NULL CHECK (debit >= 0),
        credit       NUMERIC(20, 6) NOT NULL CHECK (credit >= 0),
        description  TEXT,
        PRIMARY KEY (entry_id, line_no)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS payment_allocations (
        id             UUID PRIMARY KEY,
        tenant_id      UUID NOT NULL,
        payment_id     UUID NOT NULL REFERENCES payments (id),
        target_kind    TEXT NOT NULL,
        target_id      UUID NOT NULL,
        amount         NUMERIC(20, 6) NOT NULL CHECK (amount >= 0),
        created_at     TIMESTAMPTZ NOT NULL,
        created_by     UUID NOT NULL,
        released_at    TIMESTAMPTZ,
        release_reason TEXT,
        seq            BIGSERIAL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS payment_allocations_target
        ON payment_allocations (tenant_id, target_kind, target_id)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sales_doc_lines (
        id          UUID PRIMARY KEY,
        tenant_id   UUID NOT NULL,
        document_id UUID NOT NULL REFERENCES documents (id),
        product_id  UUID,
        quantity    NUMERIC(20, 6) NOT NULL CHECK (quantity >= 0)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS transaction_sets (
        id              UUID PRIMARY KEY,
        tenant_id       UUID NOT NULL,
        kind            TEXT NOT NULL,
        status          TEXT NOT NULL,
        idempotency_key TEXT,
        fingerprint     TEXT NOT NULL,
        result          JSONB,
        created_at      TIMESTAMPTZ NOT NULL,
        created_by      UUID NOT NULL,
        posted_at       TIMESTAMPTZ,
        UNIQUE (tenant_id, idempotency_key)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS transaction_sets_drafts
        ON transaction_sets (created_at) WHERE status = 'draft'
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS inventory_balances (
        tenant_id    UUID NOT NULL,
        product_id   UUID NOT NULL,
        warehouse_id UUID NOT NULL,
        location_id  UUID,
        on_hand      NUMERIC(20, 6) NOT NULL,
        reserved     NUMERIC(20, 6) NOT NULL,
        available    NUMERIC(20, 6) NOT NULL,
        updated_at   TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        CONSTRAINT inventory_balances_key
            UNIQUE NULLS NOT DISTINCT (tenant_id, product_id, warehouse_id, location_id),
        CONSTRAINT inventory_balances_conserved
            CHECK (reserved >= 0 AND reserved <= on_hand AND available = on_hand - reserved)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS inventory_movements (
        id                 UUID PRIMARY KEY,
        tenant_id          UUID NOT NULL,
        movement_type      TEXT NOT NULL,
        status             TEXT NOT NULL,
        product_id         UUID NOT NULL,
        quantity           NUMERIC(20, 6) NOT NULL CHECK (quantity > 0),
        from_warehouse     UUID,
        to_warehouse       UUID,
        location_id        UUID,
        transaction_set_id UUID NOT NULL REFERENCES transaction_sets (id),
        reference          TEXT,
        created_at         TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sales_fulfillments (
        id                 UUID PRIMARY KEY,
        tenant_id          UUID NOT NULL,
        document_id        UUID NOT NULL,
        line_id            UUID NOT NULL REFERENCES sales_doc_lines (id),
        fulfillment_type   TEXT NOT NULL,
        quantity           NUMERIC(20, 6) NOT NULL CHECK (quantity > 0),
        warehouse_id       UUID NOT NULL,
        movement_id        UUID NOT NULL REFERENCES inventory_movements (id),
        transaction_set_id UUID NOT NULL REFERENCES transaction_sets (id),
        created_at         TIMESTAMPTZ NOT NULL,
        created_by         UUID NOT NULL,
        seq                BIGSERIAL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS inventory_transfers (
        id                 UUID PRIMARY KEY,
        tenant_id          UUID NOT NULL,
        product_id         UUID NOT NULL,
        from_warehouse     UUID NOT NULL,
        to_warehouse       UUID NOT NULL,
        quantity           NUMERIC(20, 6) NOT NULL CHECK (quantity > 0),
        transfer_date      DATE NOT NULL,
        movement_id        UUID NOT NULL REFERENCES inventory_movements (id),
        transaction_set_id UUID NOT NULL REFERENCES transaction_sets (id),
        created_at         TIMESTAMPTZ NOT NULL,
        created_by         UUID NOT NULL,
        CHECK (from_warehouse <> to_warehouse)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS audit_log (
        id          UUID PRIMARY KEY,
        tenant_id   UUID NOT NULL,
        actor_id    UUID NOT NULL,
        action      TEXT NOT NULL,
        entity_type TEXT NOT NULL,
        entity_id   UUID NOT NULL,
        metadata    JSONB NOT NULL,
        recorded_at TIMESTAMPTZ NOT NULL
    )
    "#,
];

#[derive(Debug, Clone)]
pub struct PostgresEngineStore {
    pool: Arc<PgPool>,
}

impl PostgresEngineStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a pool sized from `config`.
    pub async fn connect(config: &EngineConfig) -> Result<Self, StoreError> {
        let url = config
            .require_database_url()
            .map_err(|e: ConfigError| StoreError::Backend(e.to_string()))?;
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl EngineStore for PostgresEngineStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Ok(Box::new(PgStoreTx { tx }))
    }
}

struct PgStoreTx {
    tx: Transaction<'static, Postgres>,
}

fn lock_clause(lock: RowLock) -> &'static str {
    match lock {
        RowLock::ForUpdate => " FOR UPDATE",
        RowLock::None => "",
    }
}

#[async_trait]
impl StoreTx for PgStoreTx {
    async fn account(&mut self, tenant_id: TenantId, code: &str) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query(
            "SELECT tenant_id, code, name, kind FROM accounts WHERE tenant_id = $1 AND code = $2",
        )
        .bind(tenant_id.as_uuid())
        .bind(code)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("account", e))?;

        row.map(|r| {
            Ok(Account {
                tenant_id: TenantId::from_uuid(get(&r, "tenant_id")?),
                code: get(&r, "code")?,
                name: get(&r, "name")?,
                kind: parse_enum::<AccountKind>(&r, "kind")?,
            })
        })
        .transpose()
    }

    async fn document(
        &mut self,
        tenant_id: TenantId,
        kind: DocumentKind,
        id: DocumentId,
        lock: RowLock,
    ) -> Result<Option<Document>, StoreError> {
        let sql = format!(
            "SELECT id, tenant_id, kind, doc_type, status, currency, total_amount, tax_amount, \
             party_id, journal_entry_id FROM documents \
             WHERE tenant_id = $1 AND kind = $2 AND id = $3{}",
            lock_clause(lock)
        );
        let row = sqlx::query(&sql)
            .bind(tenant_id.as_uuid())
            .bind(kind.as_str())
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("document", e))?;
        row.map(|r| document_from_row(&r)).transpose()
    }

    async fn update_document(&mut self, document: &Document) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE documents SET status = $3, journal_entry_id = $4 WHERE tenant_id = $1 AND id = $2",
        )
        .bind(document.tenant_id.as_uuid())
        .bind(document.id.as_uuid())
        .bind(document.status.as_str())
        .bind(document.journal_entry_id.map(Uuid::from))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_document", e))?;
        Ok(())
    }

    async fn payment(
        &mut self,
        tenant_id: TenantId,
        id: PaymentId,
        lock: RowLock,
    ) -> Result<Option<Payment>, StoreError> {
        let sql = format!(
            "SELECT id, tenant_id, kind, amount, currency, status, party_id, payment_date, \
             journal_entry_id FROM payments WHERE tenant_id = $1 AND id = $2{}",
            lock_clause(lock)
        );
        let row = sqlx::query(&sql)
            .bind(tenant_id.as_uuid())
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("payment", e))?;

        row.map(|r| {
            Ok(Payment {
                id: PaymentId::from_uuid(get(&r, "id")?),
                tenant_id: TenantId::from_uuid(get(&r, "tenant_id")?),
                kind: parse_enum(&r, "kind")?,
                amount: get(&r, "amount")?,
                currency: get(&r, "currency")?,
                status: parse_enum(&r, "status")?,
                party_id: get::<Option<Uuid>>(&r, "party_id")?.map(PartyId::from_uuid),
                payment_date: get::<NaiveDate>(&r, "payment_date")?,
                journal_entry_id: get::<Option<Uuid>>(&r, "journal_entry_id")?
                    .map(JournalEntryId::from_uuid),
            })
        })
        .transpose()
    }

    async fn update_payment(&mut self, payment: &Payment) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE payments SET status = $3, journal_entry_id = $4 WHERE tenant_id = $1 AND id = $2",
        )
        .bind(payment.tenant_id.as_uuid())
        .bind(payment.id.as_uuid())
        .bind(payment.status.as_str())
        .bind(payment.journal_entry_id.map(Uuid::from))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_payment", e))?;
        Ok(())
    }

    #[instrument(skip(self, entry), fields(entry_id = %entry.id_typed()), err)]
    async fn insert_journal_entry(&mut self, entry: &JournalEntry) -> Result<(), StoreError> {
        use forgeledger_core::TenantScoped;

        let source = entry.source();
        sqlx::query(
            r#"
            INSERT INTO journal_entries (
                id, tenant_id, posting_date, entry_date, memo,
                source_kind, source_id, reverses, posted_at, posted_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(entry.id_typed().as_uuid())
        .bind(entry.tenant_id().as_uuid())
        .bind(entry.posting_date())
        .bind(entry.entry_date())
        .bind(entry.memo())
        .bind(source.map(|s| s.kind.as_str()))
        .bind(source.map(|s| s.id))
        .bind(entry.reverses().map(Uuid::from))
        .bind(entry.posted_at())
        .bind(entry.posted_by().as_uuid())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_journal_entry", e))?;

        for line in entry.lines() {
            sqlx::query(
                r#"
                INSERT INTO journal_lines (
                    entry_id, tenant_id, line_no, account_code, debit, credit, description
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(entry.id_typed().as_uuid())
            .bind(entry.tenant_id().as_uuid())
            .bind(line.line_no as i32)
            .bind(&line.account_code)
            .bind(line.debit)
            .bind(line.credit)
            .bind(line.description.as_deref())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("insert_journal_line", e))?;
        }
        Ok(())
    }

    async fn journal_entry(
        &mut self,
        tenant_id: TenantId,
        id: JournalEntryId,
    ) -> Result<Option<JournalEntry>, StoreError> {
        self.load_entry(tenant_id, "id", *id.as_uuid()).await
    }

    async fn reversal_of(
        &mut self,
        tenant_id: TenantId,
        id: JournalEntryId,
    ) -> Result<Option<JournalEntry>, StoreError> {
        self.load_entry(tenant_id, "reverses", *id.as_uuid()).await
    }

    async fn allocations_for_payment(
        &mut self,
        tenant_id: TenantId,
        payment_id: PaymentId,
    ) -> Result<Vec<PaymentAllocation>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, tenant_id, payment_id, target_kind, target_id, amount,
                   created_at, created_by, released_at, release_reason
            FROM payment_allocations
            WHERE tenant_id = $1 AND payment_id = $2
            ORDER BY seq ASC
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(payment_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("allocations_for_payment", e))?;

        rows.iter().map(allocation_from_row).collect()
    }

    async fn allocated_to_document(
        &mut self,
        tenant_id: TenantId,
        target: AllocationTarget,
    ) -> Result<Decimal, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(amount), 0) AS allocated
            FROM payment_allocations
            WHERE tenant_id = $1 AND target_kind = $2 AND target_id = $3 AND amount > 0
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(target.kind.as_str())
        .bind(target.id.as_uuid())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("allocated_to_document", e))?;
        get(&row, "allocated")
    }

    async fn insert_allocation(&mut self, allocation: &PaymentAllocation) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO payment_allocations (
                id, tenant_id, payment_id, target_kind, target_id, amount,
                created_at, created_by, released_at, release_reason
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(allocation.id.as_uuid())
        .bind(allocation.tenant_id.as_uuid())
        .bind(allocation.payment_id.as_uuid())
        .bind(allocation.target.kind.as_str())
        .bind(allocation.target.id.as_uuid())
        .bind(allocation.amount)
        .bind(allocation.created_at)
        .bind(allocation.created_by.as_uuid())
        .bind(allocation.released_at)
        .bind(allocation.release_reason.as_deref())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_allocation", e))?;
        Ok(())
    }

    async fn update_allocation(&mut self, allocation: &PaymentAllocation) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE payment_allocations
            SET amount = $3, released_at = $4, release_reason = $5
            WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(allocation.tenant_id.as_uuid())
        .bind(allocation.id.as_uuid())
        .bind(allocation.amount)
        .bind(allocation.released_at)
        .bind(allocation.release_reason.as_deref())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_allocation", e))?;
        Ok(())
    }

    async fn sales_line(
        &mut self,
        tenant_id: TenantId,
        document_id: DocumentId,
        line_id: LineId,
        lock: RowLock,
    ) -> Result<Option<SalesDocLine>, StoreError> {
        let sql = format!(
            "SELECT id, tenant_id, document_id, product_id, quantity FROM sales_doc_lines \
             WHERE tenant_id = $1 AND document_id = $2 AND id = $3{}",
            lock_clause(lock)
        );
        let row = sqlx::query(&sql)
            .bind(tenant_id.as_uuid())
            .bind(document_id.as_uuid())
            .bind(line_id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("sales_line", e))?;

        row.map(|r| {
            Ok(SalesDocLine {
                id: LineId::from_uuid(get(&r, "id")?),
                tenant_id: TenantId::from_uuid(get(&r, "tenant_id")?),
                document_id: DocumentId::from_uuid(get(&r, "document_id")?),
                product_id: get::<Option<Uuid>>(&r, "product_id")?.map(ProductId::from_uuid),
                quantity: get(&r, "quantity")?,
            })
        })
        .transpose()
    }

    async fn fulfillments_for_line(
        &mut self,
        tenant_id: TenantId,
        line_id: LineId,
    ) -> Result<Vec<SalesFulfillment>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, tenant_id, document_id, line_id, fulfillment_type, quantity,
                   warehouse_id, movement_id, transaction_set_id, created_at, created_by
            FROM sales_fulfillments
            WHERE tenant_id = $1 AND line_id = $2
            ORDER BY seq ASC
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(line_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("fulfillments_for_line", e))?;

        rows.iter()
            .map(|r| {
                Ok(SalesFulfillment {
                    id: FulfillmentId::from_uuid(get(r, "id")?),
                    tenant_id: TenantId::from_uuid(get(r, "tenant_id")?),
                    document_id: DocumentId::from_uuid(get(r, "document_id")?),
                    line_id: LineId::from_uuid(get(r, "line_id")?),
                    fulfillment_type: parse_enum(r, "fulfillment_type")?,
                    quantity: get(r, "quantity")?,
                    warehouse_id: WarehouseId::from_uuid(get(r, "warehouse_id")?),
                    movement_id: MovementId::from_uuid(get(r, "movement_id")?),
                    transaction_set_id: TransactionSetId::from_uuid(get(r, "transaction_set_id")?),
                    created_at: get(r, "created_at")?,
                    created_by: UserId::from_uuid(get(r, "created_by")?),
                })
            })
            .collect()
    }

    async fn insert_fulfillment(&mut self, fulfillment: &SalesFulfillment) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO sales_fulfillments (
                id, tenant_id, document_id, line_id, fulfillment_type, quantity,
                warehouse_id, movement_id, transaction_set_id, created_at, created_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(fulfillment.id.as_uuid())
        .bind(fulfillment.tenant_id.as_uuid())
        .bind(fulfillment.document_id.as_uuid())
        .bind(fulfillment.line_id.as_uuid())
        .bind(fulfillment.fulfillment_type.as_str())
        .bind(fulfillment.quantity)
        .bind(fulfillment.warehouse_id.as_uuid())
        .bind(fulfillment.movement_id.as_uuid())
        .bind(fulfillment.transaction_set_id.as_uuid())
        .bind(fulfillment.created_at)
        .bind(fulfillment.created_by.as_uuid())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_fulfillment", e))?;
        Ok(())
    }

    async fn balance(
        &mut self,
        key: &BalanceKey,
        lock: RowLock,
    ) -> Result<Option<InventoryBalance>, StoreError> {
        let sql = format!(
            "SELECT on_hand, reserved, available FROM inventory_balances \
             WHERE tenant_id = $1 AND product_id = $2 AND warehouse_id = $3 \
             AND location_id IS NOT DISTINCT FROM $4{}",
            lock_clause(lock)
        );
        let row = sqlx::query(&sql)
            .bind(key.tenant_id.as_uuid())
            .bind(key.product_id.as_uuid())
            .bind(key.warehouse_id.as_uuid())
            .bind(key.location_id.map(Uuid::from))
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("balance", e))?;

        row.map(|r| {
            InventoryBalance::restore(
                *key,
                get(&r, "on_hand")?,
                get(&r, "reserved")?,
                get(&r, "available")?,
            )
            .map_err(|e| StoreError::Decode(e.to_string()))
        })
        .transpose()
    }

    #[instrument(skip(self), fields(balance = %key), err)]
    async fn lock_or_create_balance(&mut self, key: &BalanceKey) -> Result<InventoryBalance, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO inventory_balances (
                tenant_id, product_id, warehouse_id, location_id, on_hand, reserved, available
            )
            VALUES ($1, $2, $3, $4, 0, 0, 0)
            ON CONFLICT ON CONSTRAINT inventory_balances_key DO NOTHING
            "#,
        )
        .bind(key.tenant_id.as_uuid())
        .bind(key.product_id.as_uuid())
        .bind(key.warehouse_id.as_uuid())
        .bind(key.location_id.map(Uuid::from))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("create_balance", e))?;

        self.balance(key, RowLock::ForUpdate)
            .await?
            .ok_or_else(|| StoreError::Backend(format!("balance {key} vanished after insert")))
    }

    async fn update_balance(&mut self, balance: &InventoryBalance) -> Result<(), StoreError> {
        let key = balance.key();
        let result = sqlx::query(
            r#"
            UPDATE inventory_balances
            SET on_hand = $5, reserved = $6, available = $7, updated_at = NOW()
            WHERE tenant_id = $1 AND product_id = $2 AND warehouse_id = $3
              AND location_id IS NOT DISTINCT FROM $4
            "#,
        )
        .bind(key.tenant_id.as_uuid())
        .bind(key.product_id.as_uuid())
        .bind(key.warehouse_id.as_uuid())
        .bind(key.location_id.map(Uuid::from))
        .bind(balance.on_hand())
        .bind(balance.reserved())
        .bind(balance.available())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_balance", e))?;

        if result.rows_affected() != 1 {
            return Err(StoreError::Backend(format!(
                "balance {key} was not locked before update"
            )));
        }
        Ok(())
    }

    async fn insert_movement(&mut self, movement: &InventoryMovement) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO inventory_movements (
                id, tenant_id, movement_type, status, product_id, quantity,
                from_warehouse, to_warehouse, location_id, transaction_set_id, reference, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(movement.id.as_uuid())
        .bind(movement.tenant_id.as_uuid())
        .bind(movement.movement_type.as_str())
        .bind(movement.status.as_str())
        .bind(movement.product_id.as_uuid())
        .bind(movement.quantity)
        .bind(movement.from_warehouse.map(Uuid::from))
        .bind(movement.to_warehouse.map(Uuid::from))
        .bind(movement.location_id.map(Uuid::from))
        .bind(movement.transaction_set_id.as_uuid())
        .bind(movement.reference.as_deref())
        .bind(movement.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_movement", e))?;
        Ok(())
    }

    async fn insert_transfer(&mut self, transfer: &InventoryTransfer) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO inventory_transfers (
                id, tenant_id, product_id, from_warehouse, to_warehouse, quantity,
                transfer_date, movement_id, transaction_set_id, created_at, created_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(transfer.id.as_uuid())
        .bind(transfer.tenant_id.as_uuid())
        .bind(transfer.product_id.as_uuid())
        .bind(transfer.from_warehouse.as_uuid())
        .bind(transfer.to_warehouse.as_uuid())
        .bind(transfer.quantity)
        .bind(transfer.transfer_date)
        .bind(transfer.movement_id.as_uuid())
        .bind(transfer.transaction_set_id.as_uuid())
        .bind(transfer.created_at)
        .bind(transfer.created_by.as_uuid())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_transfer", e))?;
        Ok(())
    }

    async fn insert_transaction_set(&mut self, set: &TransactionSet) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO transaction_sets (
                id, tenant_id, kind, status, idempotency_key, fingerprint,
                result, created_at, created_by, posted_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(set.id.as_uuid())
        .bind(set.tenant_id.as_uuid())
        .bind(set.kind.as_str())
        .bind(set.status.as_str())
        .bind(set.idempotency_key.as_deref())
        .bind(&set.fingerprint)
        .bind(&set.result)
        .bind(set.created_at)
        .bind(set.created_by.as_uuid())
        .bind(set.posted_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_transaction_set", e))?;
        Ok(())
    }

    async fn transaction_set(
        &mut self,
        tenant_id: TenantId,
        id: TransactionSetId,
        lock: RowLock,
    ) -> Result<Option<TransactionSet>, StoreError> {
        let sql = format!(
            "{TRANSACTION_SET_COLUMNS} WHERE tenant_id = $1 AND id = $2{}",
            lock_clause(lock)
        );
        let row = sqlx::query(&sql)
            .bind(tenant_id.as_uuid())
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("transaction_set", e))?;
        row.map(|r| transaction_set_from_row(&r)).transpose()
    }

    async fn transaction_set_by_key(
        &mut self,
        tenant_id: TenantId,
        idempotency_key: &str,
        lock: RowLock,
    ) -> Result<Option<TransactionSet>, StoreError> {
        let sql = format!(
            "{TRANSACTION_SET_COLUMNS} WHERE tenant_id = $1 AND idempotency_key = $2{}",
            lock_clause(lock)
        );
        let row = sqlx::query(&sql)
            .bind(tenant_id.as_uuid())
            .bind(idempotency_key)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("transaction_set_by_key", e))?;
        row.map(|r| transaction_set_from_row(&r)).transpose()
    }

    async fn update_transaction_set(&mut self, set: &TransactionSet) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE transaction_sets
            SET status = $3, result = $4, posted_at = $5
            WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(set.tenant_id.as_uuid())
        .bind(set.id.as_uuid())
        .bind(set.status.as_str())
        .bind(&set.result)
        .bind(set.posted_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_transaction_set", e))?;
        Ok(())
    }

    async fn delete_draft_transaction_set(
        &mut self,
        tenant_id: TenantId,
        id: TransactionSetId,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "DELETE FROM transaction_sets WHERE tenant_id = $1 AND id = $2 AND status = 'draft'",
        )
        .bind(tenant_id.as_uuid())
        .bind(id.as_uuid())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("delete_draft_transaction_set", e))?;
        Ok(result.rows_affected() == 1)
    }

    async fn draft_transaction_sets_before(
        &mut self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<TransactionSet>, StoreError> {
        let sql = format!(
            "{TRANSACTION_SET_COLUMNS} WHERE status = 'draft' AND created_at < $1 ORDER BY created_at ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(cutoff)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("draft_transaction_sets_before", e))?;
        rows.iter().map(transaction_set_from_row).collect()
    }

    async fn insert_audit(&mut self, record: &AuditRecord) -> Result<(), StoreError> {
        use forgeledger_core::TenantScoped;

        sqlx::query(
            r#"
            INSERT INTO audit_log (
                id, tenant_id, actor_id, action, entity_type, entity_id, metadata, recorded_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.id().as_uuid())
        .bind(record.tenant_id().as_uuid())
        .bind(record.actor_id().as_uuid())
        .bind(record.action().as_str())
        .bind(record.entity().as_str())
        .bind(record.entity_id())
        .bind(record.metadata())
        .bind(record.recorded_at())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_audit", e))?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }
}

const TRANSACTION_SET_COLUMNS: &str = "SELECT id, tenant_id, kind, status, idempotency_key, \
     fingerprint, result, created_at, created_by, posted_at FROM transaction_sets";

impl PgStoreTx {
    /// Load an entry header matched on `column` plus its lines.
    async fn load_entry(
        &mut self,
        tenant_id: TenantId,
        column: &'static str,
        value: Uuid,
    ) -> Result<Option<JournalEntry>, StoreError> {
        let sql = format!(
            "SELECT id, tenant_id, posting_date, entry_date, memo, source_kind, source_id, \
             reverses, posted_at, posted_by FROM journal_entries \
             WHERE tenant_id = $1 AND {column} = $2"
        );
        let Some(header) = sqlx::query(&sql)
            .bind(tenant_id.as_uuid())
            .bind(value)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("journal_entry", e))?
        else {
            return Ok(None);
        };

        let id: Uuid = get(&header, "id")?;
        let lines = sqlx::query(
            r#"
            SELECT line_no, account_code, debit, credit, description
            FROM journal_lines
            WHERE tenant_id = $1 AND entry_id = $2
            ORDER BY line_no ASC
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("journal_lines", e))?
        .iter()
        .map(|r| {
            Ok(JournalLine {
                line_no: get::<i32>(r, "line_no")? as u32,
                account_code: get(r, "account_code")?,
                debit: get(r, "debit")?,
                credit: get(r, "credit")?,
                description: get(r, "description")?,
            })
        })
        .collect::<Result<Vec<_>, StoreError>>()?;

        let source = match (
            get::<Option<String>>(&header, "source_kind")?,
            get::<Option<Uuid>>(&header, "source_id")?,
        ) {
            (Some(kind), Some(source_id)) => Some(SourceRef {
                kind: SourceKind::from_str(&kind).map_err(StoreError::Decode)?,
                id: source_id,
            }),
            _ => None,
        };

        JournalEntry::restore(
            JournalEntryId::from_uuid(id),
            TenantId::from_uuid(get(&header, "tenant_id")?),
            get(&header, "posting_date")?,
            get(&header, "entry_date")?,
            get(&header, "memo")?,
            source,
            get::<Option<Uuid>>(&header, "reverses")?.map(JournalEntryId::from_uuid),
            get(&header, "posted_at")?,
            UserId::from_uuid(get(&header, "posted_by")?),
            lines,
        )
        .map(Some)
        .map_err(|e| StoreError::Decode(e.to_string()))
    }
}

fn document_from_row(r: &PgRow) -> Result<Document, StoreError> {
    Ok(Document {
        id: DocumentId::from_uuid(get(r, "id")?),
        tenant_id: TenantId::from_uuid(get(r, "tenant_id")?),
        kind: parse_enum(r, "kind")?,
        doc_type: parse_enum(r, "doc_type")?,
        status: parse_enum(r, "status")?,
        currency: get(r, "currency")?,
        total_amount: get(r, "total_amount")?,
        tax_amount: get(r, "tax_amount")?,
        party_id: get::<Option<Uuid>>(r, "party_id")?.map(PartyId::from_uuid),
        journal_entry_id: get::<Option<Uuid>>(r, "journal_entry_id")?.map(JournalEntryId::from_uuid),
    })
}

fn allocation_from_row(r: &PgRow) -> Result<PaymentAllocation, StoreError> {
    Ok(PaymentAllocation {
        id: forgeledger_core::AllocationId::from_uuid(get(r, "id")?),
        tenant_id: TenantId::from_uuid(get(r, "tenant_id")?),
        payment_id: PaymentId::from_uuid(get(r, "payment_id")?),
        target: AllocationTarget {
            kind: parse_enum(r, "target_kind")?,
            id: DocumentId::from_uuid(get(r, "target_id")?),
        },
        amount: get(r, "amount")?,
        created_at: get(r, "created_at")?,
        created_by: UserId::from_uuid(get(r, "created_by")?),
        released_at: get(r, "released_at")?,
        release_reason: get(r, "release_reason")?,
    })
}

fn transaction_set_from_row(r: &PgRow) -> Result<TransactionSet, StoreError> {
    Ok(TransactionSet {
        id: TransactionSetId::from_uuid(get(r, "id")?),
        tenant_id: TenantId::from_uuid(get(r, "tenant_id")?),
        kind: parse_enum(r, "kind")?,
        status: parse_enum(r, "status")?,
        idempotency_key: get(r, "idempotency_key")?,
        fingerprint: get(r, "fingerprint")?,
        result: get(r, "result")?,
        created_at: get(r, "created_at")?,
        created_by: UserId::from_uuid(get(r, "created_by")?),
        posted_at: get(r, "posted_at")?,
    })
}

fn get<'r, T>(row: &'r PgRow, column: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column)
        .map_err(|e| StoreError::Decode(format!("column {column}: {e}")))
}

fn parse_enum<T>(row: &PgRow, column: &str) -> Result<T, StoreError>
where
    T: FromStr<Err = String>,
{
    let raw: String = get(row, column)?;
    raw.parse().map_err(StoreError::Decode)
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Conflict(msg),
                Some("40001") | Some("40P01") => StoreError::Retryable(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::RowNotFound => {
            StoreError::Backend(format!("unexpected row not found in {}", operation))
        }
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_statements_are_idempotent_ddl() {
        for statement in SCHEMA {
            let s = statement.trim_start();
            assert!(
                s.starts_with("CREATE TABLE IF NOT EXISTS")
                    || s.starts_with("CREATE INDEX IF NOT EXISTS"),
                "{s}"
            );
        }
    }

    #[test]
    fn lock_clause_only_for_updates() {
        assert_eq!(lock_clause(RowLock::ForUpdate), " FOR UPDATE");
        assert_eq!(lock_clause(RowLock::None), "");
    }
}
