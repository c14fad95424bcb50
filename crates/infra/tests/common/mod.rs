#![allow(dead_code)]

use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;

use forgeledger_accounting::{Account, AccountKind, PostingAccounts};
use forgeledger_core::{DocumentId, LineId, PaymentId, ProductId, TenantId, UserId, WarehouseId};
use forgeledger_events::{ActionRegistry, InMemoryAuditSink};
use forgeledger_infra::{EngineConfig, InMemoryEngineStore, LedgerEngine, RequestContext};
use forgeledger_inventory::{BalanceKey, InventoryBalance, SalesDocLine};
use forgeledger_payments::{
    Document, DocumentKind, DocumentStatus, DocumentType, Payment, PaymentKind, PaymentStatus,
};

pub fn dec(n: i64) -> Decimal {
    Decimal::from(n)
}

pub struct Fixture {
    pub store: InMemoryEngineStore,
    pub sink: Arc<InMemoryAuditSink>,
    pub engine: LedgerEngine,
    pub ctx: RequestContext,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_config(EngineConfig::default()).await
    }

    pub async fn with_config(config: EngineConfig) -> Self {
        let store = InMemoryEngineStore::new();
        let sink = Arc::new(InMemoryAuditSink::new());
        let ctx = RequestContext::new(TenantId::new(), UserId::new());
        let engine = LedgerEngine::new(
            Arc::new(store.clone()),
            Arc::new(ActionRegistry::standard()),
            sink.clone(),
            config,
        );
        let fixture = Self {
            store,
            sink,
            engine,
            ctx,
        };
        fixture.seed_chart(ctx.tenant_id).await;
        fixture
    }

    /// A second caller on the same engine and store.
    pub fn other_tenant(&self) -> RequestContext {
        RequestContext::new(TenantId::new(), UserId::new())
    }

    pub async fn seed_chart(&self, tenant_id: TenantId) {
        let accounts = PostingAccounts::default();
        for (code, name, kind) in [
            (accounts.cash, "Cash", AccountKind::Asset),
            (accounts.receivable, "Accounts receivable", AccountKind::Asset),
            (accounts.tax_receivable, "Tax receivable", AccountKind::Asset),
            (accounts.payable, "Accounts payable", AccountKind::Liability),
            (accounts.tax_payable, "Tax payable", AccountKind::Liability),
            (accounts.revenue, "Revenue", AccountKind::Revenue),
            (accounts.purchases, "Purchases", AccountKind::Expense),
        ] {
            self.store
                .seed_account(Account {
                    tenant_id,
                    code,
                    name: name.to_string(),
                    kind,
                })
                .await;
        }
    }

    pub async fn document(
        &self,
        kind: DocumentKind,
        doc_type: DocumentType,
        total: Decimal,
        tax: Decimal,
    ) -> Document {
        let document = Document {
            id: DocumentId::new(),
            tenant_id: self.ctx.tenant_id,
            kind,
            doc_type,
            status: DocumentStatus::Open,
            currency: "USD".to_string(),
            total_amount: total,
            tax_amount: tax,
            party_id: None,
            journal_entry_id: None,
        };
        self.store.seed_document(document.clone()).await;
        document
    }

    pub async fn sales_invoice(&self, total: Decimal) -> Document {
        self.document(DocumentKind::SalesDoc, DocumentType::Invoice, total, Decimal::ZERO)
            .await
    }

    pub async fn purchase_invoice(&self, total: Decimal) -> Document {
        self.document(DocumentKind::PurchaseDoc, DocumentType::Invoice, total, Decimal::ZERO)
            .await
    }

    pub async fn payment(&self, kind: PaymentKind, amount: Decimal) -> Payment {
        let payment = Payment {
            id: PaymentId::new(),
            tenant_id: self.ctx.tenant_id,
            kind,
            amount,
            currency: "USD".to_string(),
            status: PaymentStatus::Draft,
            party_id: None,
            payment_date: NaiveDate::from_ymd_opt(2026, 3, 31).unwrap(),
            journal_entry_id: None,
        };
        self.store.seed_payment(payment.clone()).await;
        payment
    }

    pub async fn receipt(&self, amount: Decimal) -> Payment {
        self.payment(PaymentKind::Receipt, amount).await
    }

    /// A sales order with one line for `quantity` of a fresh product.
    pub async fn order_line(&self, quantity: Decimal) -> SalesDocLine {
        self.order_line_for(ProductId::new(), quantity).await
    }

    pub async fn order_line_for(&self, product_id: ProductId, quantity: Decimal) -> SalesDocLine {
        let order = self
            .document(
                DocumentKind::SalesDoc,
                DocumentType::Order,
                dec(1000),
                Decimal::ZERO,
            )
            .await;
        let line = SalesDocLine {
            id: LineId::new(),
            tenant_id: self.ctx.tenant_id,
            document_id: order.id,
            product_id: Some(product_id),
            quantity,
        };
        self.store.seed_line(line.clone()).await;
        line
    }

    pub fn key(&self, product_id: ProductId, warehouse_id: WarehouseId) -> BalanceKey {
        BalanceKey::new(self.ctx.tenant_id, product_id, warehouse_id)
    }

    pub async fn stock(&self, key: BalanceKey, on_hand: Decimal, reserved: Decimal) {
        let balance = InventoryBalance::restore(key, on_hand, reserved, on_hand - reserved).unwrap();
        self.store.seed_balance(balance).await;
    }

    pub async fn balance(&self, key: &BalanceKey) -> InventoryBalance {
        self.store
            .balance(key)
            .await
            .unwrap_or_else(|| InventoryBalance::empty(*key))
    }
}
