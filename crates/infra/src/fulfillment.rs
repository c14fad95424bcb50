//! Stock movements: line fulfillment, warehouse transfers and receipts.
//!
//! Each call touches one line and at most two balance rows. Balance rows are
//! locked before they are read; a transfer locks its two rows in warehouse-id
//! order so that opposite transfers between the same pair cannot deadlock.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::instrument;

use forgeledger_core::{
    DocumentId, DomainError, Entity, FulfillmentId, LineId, LocationId, MovementId, ProductId,
    TransactionSetId, TransferId, WarehouseId,
};
use forgeledger_events::AuditAction;
use forgeledger_inventory::{
    BalanceKey, FulfillmentType, InventoryBalance, InventoryMovement, InventoryTransfer,
    LineProgress, LineState, MovementType, SalesDocLine, SalesFulfillment, TransactionSetKind,
    ensure_positive_quantity, validate_transfer,
};
use forgeledger_payments::{Document, DocumentKind};

use crate::engine::{LedgerEngine, RequestContext};
use crate::error::EngineResult;
use crate::store::{RowLock, StoreTx};
use crate::transaction_set::{LockedSet, Recorded, SetStart};

/// Balance figures after an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub on_hand: Decimal,
    pub reserved: Decimal,
    pub available: Decimal,
}

impl From<&InventoryBalance> for BalanceSnapshot {
    fn from(balance: &InventoryBalance) -> Self {
        Self {
            on_hand: balance.on_hand(),
            reserved: balance.reserved(),
            available: balance.available(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FulfillRequest {
    pub document_id: DocumentId,
    pub line_id: LineId,
    pub warehouse_id: WarehouseId,
    pub quantity: Decimal,
    pub fulfillment_type: FulfillmentType,
    #[serde(skip)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FulfillResult {
    pub fulfillment_id: FulfillmentId,
    pub movement_id: MovementId,
    pub transaction_set_id: TransactionSetId,
    pub line_state: LineState,
    pub remaining_to_fulfill: Decimal,
    /// Balance right after this fulfillment (also on replay).
    pub balance: BalanceSnapshot,
    pub idempotent: bool,
}

impl Recorded for FulfillResult {
    fn replayed(mut self) -> Self {
        self.idempotent = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub product_id: ProductId,
    pub from_warehouse: WarehouseId,
    pub to_warehouse: WarehouseId,
    pub quantity: Decimal,
    pub transfer_date: NaiveDate,
    #[serde(skip)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResult {
    pub transfer_id: TransferId,
    pub movement_id: MovementId,
    pub transaction_set_id: TransactionSetId,
    pub source: BalanceSnapshot,
    pub destination: BalanceSnapshot,
    pub idempotent: bool,
}

impl Recorded for TransferResult {
    fn replayed(mut self) -> Self {
        self.idempotent = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveStockRequest {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub location_id: Option<LocationId>,
    pub quantity: Decimal,
    pub reference: Option<String>,
    #[serde(skip)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveStockResult {
    pub movement_id: MovementId,
    pub transaction_set_id: TransactionSetId,
    pub balance: BalanceSnapshot,
    pub idempotent: bool,
}

impl Recorded for ReceiveStockResult {
    fn replayed(mut self) -> Self {
        self.idempotent = true;
        self
    }
}

/// Derived fulfillment state of a sales line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineProgressView {
    pub line_id: LineId,
    pub ordered: Decimal,
    pub reserved: Decimal,
    pub shipped: Decimal,
    pub returned: Decimal,
    pub state: LineState,
    pub remaining_to_fulfill: Decimal,
}

impl LedgerEngine {
    /// Reserve, ship, unreserve or return stock for one sales line.
    #[instrument(
        skip(self, ctx, request),
        fields(
            tenant_id = %ctx.tenant_id,
            line_id = %request.line_id,
            kind = request.fulfillment_type.as_str(),
            quantity = %request.quantity
        ),
        err
    )]
    pub async fn fulfill(&self, ctx: &RequestContext, request: FulfillRequest) -> EngineResult<FulfillResult> {
        ensure_positive_quantity(request.quantity)?;

        self.bounded("fulfill", async {
            let start = self
                .open_set::<_, FulfillResult>(
                    ctx,
                    TransactionSetKind::Fulfillment,
                    request.idempotency_key.as_deref(),
                    &request,
                )
                .await?;
            let set_id = match start {
                SetStart::Replayed(result) => return Ok(result),
                SetStart::Proceed(set) => set.id,
            };
            let outcome = self.fulfill_in_set(ctx, &request, set_id).await;
            self.settle_set(ctx, set_id, outcome).await
        })
        .await
    }

    async fn fulfill_in_set(
        &self,
        ctx: &RequestContext,
        request: &FulfillRequest,
        set_id: TransactionSetId,
    ) -> EngineResult<FulfillResult> {
        let mut tx = self.begin().await?;
        let set = match self.lock_set(tx.as_mut(), ctx.tenant_id, set_id).await? {
            LockedSet::Draft(set) => set,
            LockedSet::Posted(result) => return Ok(result),
        };

        let line = load_line(tx.as_mut(), ctx, request.document_id, request.line_id, RowLock::ForUpdate).await?;
        let product_id = line.product()?;
        let history = tx.fulfillments_for_line(ctx.tenant_id, line.id).await?;
        let mut progress = LineProgress::fold(line.quantity, &history);
        if let Err(e) = progress.check(line.id, request.fulfillment_type, request.quantity) {
            tracing::warn!(line_id = %line.id, error = %e, "fulfillment exceeds line");
            return Err(e.into());
        }

        let key = BalanceKey::new(ctx.tenant_id, product_id, request.warehouse_id);
        let mut balance = match request.fulfillment_type {
            FulfillmentType::Return => tx.lock_or_create_balance(&key).await?,
            _ => tx
                .balance(&key, RowLock::ForUpdate)
                .await?
                .unwrap_or_else(|| InventoryBalance::empty(key)),
        };

        let applied = match request.fulfillment_type {
            FulfillmentType::Reserve => balance.reserve(request.quantity),
            FulfillmentType::Ship => balance.ship(request.quantity, progress.reserved),
            FulfillmentType::Unreserve => balance.unreserve(request.quantity),
            FulfillmentType::Return => balance.receive(request.quantity),
        };
        if let Err(e) = applied {
            tracing::warn!(
                balance = %key,
                on_hand = %balance.on_hand(),
                reserved = %balance.reserved(),
                available = %balance.available(),
                error = %e,
                "fulfillment rejected"
            );
            return Err(e.into());
        }
        tx.update_balance(&balance).await?;

        let now = Utc::now();
        let (from, to) = match request.fulfillment_type {
            FulfillmentType::Return => (None, Some(request.warehouse_id)),
            _ => (Some(request.warehouse_id), None),
        };
        let movement = InventoryMovement::record(
            ctx.tenant_id,
            request.fulfillment_type.movement_type(),
            product_id,
            request.quantity,
            from,
            to,
            set.id,
            now,
        );
        tx.insert_movement(&movement).await?;

        let fulfillment = SalesFulfillment {
            id: FulfillmentId::new(),
            tenant_id: ctx.tenant_id,
            document_id: request.document_id,
            line_id: line.id,
            fulfillment_type: request.fulfillment_type,
            quantity: request.quantity,
            warehouse_id: request.warehouse_id,
            movement_id: movement.id,
            transaction_set_id: set.id,
            created_at: now,
            created_by: ctx.actor_id,
        };
        tx.insert_fulfillment(&fulfillment).await?;
        progress.apply(request.fulfillment_type, request.quantity);

        let result = FulfillResult {
            fulfillment_id: fulfillment.id,
            movement_id: movement.id,
            transaction_set_id: set.id,
            line_state: progress.state(),
            remaining_to_fulfill: progress.remaining_to_fulfill(),
            balance: BalanceSnapshot::from(&balance),
            idempotent: false,
        };

        let action = match request.fulfillment_type {
            FulfillmentType::Reserve => AuditAction::FulfillmentReserve,
            FulfillmentType::Ship => AuditAction::FulfillmentShip,
            FulfillmentType::Unreserve => AuditAction::FulfillmentUnreserve,
            FulfillmentType::Return => AuditAction::FulfillmentReturn,
        };
        let record = self
            .audit
            .record(
                tx.as_mut(),
                ctx,
                action,
                fulfillment.id,
                json!({
                    "documentId": request.document_id,
                    "lineId": line.id,
                    "productId": product_id,
                    "warehouseId": request.warehouse_id,
                    "quantity": request.quantity,
                    "movementId": movement.id,
                    "transactionSetId": set.id,
                    "lineState": result.line_state.as_str(),
                    "balance": result.balance,
                }),
            )
            .await?;

        self.post_set(tx.as_mut(), set, &result).await?;
        self.commit(tx, Some(record)).await?;

        tracing::info!(
            line_id = %line.id,
            state = result.line_state.as_str(),
            available = %result.balance.available,
            "fulfillment recorded"
        );
        Ok(result)
    }

    /// Move stock between two warehouses.
    #[instrument(
        skip(self, ctx, request),
        fields(
            tenant_id = %ctx.tenant_id,
            product_id = %request.product_id,
            from = %request.from_warehouse,
            to = %request.to_warehouse,
            quantity = %request.quantity
        ),
        err
    )]
    pub async fn transfer(&self, ctx: &RequestContext, request: TransferRequest) -> EngineResult<TransferResult> {
        validate_transfer(request.from_warehouse, request.to_warehouse, request.quantity)?;

        self.bounded("transfer", async {
            let start = self
                .open_set::<_, TransferResult>(
                    ctx,
                    TransactionSetKind::Transfer,
                    request.idempotency_key.as_deref(),
                    &request,
                )
                .await?;
            let set_id = match start {
                SetStart::Replayed(result) => return Ok(result),
                SetStart::Proceed(set) => set.id,
            };
            let outcome = self.transfer_in_set(ctx, &request, set_id).await;
            self.settle_set(ctx, set_id, outcome).await
        })
        .await
    }

    async fn transfer_in_set(
        &self,
        ctx: &RequestContext,
        request: &TransferRequest,
        set_id: TransactionSetId,
    ) -> EngineResult<TransferResult> {
        let mut tx = self.begin().await?;
        let set = match self.lock_set(tx.as_mut(), ctx.tenant_id, set_id).await? {
            LockedSet::Draft(set) => set,
            LockedSet::Posted(result) => return Ok(result),
        };

        let source_key = BalanceKey::new(ctx.tenant_id, request.product_id, request.from_warehouse);
        let destination_key = BalanceKey::new(ctx.tenant_id, request.product_id, request.to_warehouse);

        let (mut source, mut destination) = if request.from_warehouse < request.to_warehouse {
            let source = lock_existing(tx.as_mut(), &source_key).await?;
            let destination = tx.lock_or_create_balance(&destination_key).await?;
            (source, destination)
        } else {
            let destination = tx.lock_or_create_balance(&destination_key).await?;
            let source = lock_existing(tx.as_mut(), &source_key).await?;
            (source, destination)
        };

        if let Err(e) = source.transfer_out(request.quantity) {
            tracing::warn!(
                balance = %source_key,
                on_hand = %source.on_hand(),
                available = %source.available(),
                error = %e,
                "transfer rejected"
            );
            return Err(e.into());
        }
        destination.receive(request.quantity)?;
        tx.update_balance(&source).await?;
        tx.update_balance(&destination).await?;

        let now = Utc::now();
        let movement = InventoryMovement::record(
            ctx.tenant_id,
            MovementType::Transfer,
            request.product_id,
            request.quantity,
            Some(request.from_warehouse),
            Some(request.to_warehouse),
            set.id,
            now,
        );
        tx.insert_movement(&movement).await?;

        let transfer = InventoryTransfer {
            id: TransferId::new(),
            tenant_id: ctx.tenant_id,
            product_id: request.product_id,
            from_warehouse: request.from_warehouse,
            to_warehouse: request.to_warehouse,
            quantity: request.quantity,
            transfer_date: request.transfer_date,
            movement_id: movement.id,
            transaction_set_id: set.id,
            created_at: now,
            created_by: ctx.actor_id,
        };
        tx.insert_transfer(&transfer).await?;

        let result = TransferResult {
            transfer_id: transfer.id,
            movement_id: movement.id,
            transaction_set_id: set.id,
            source: BalanceSnapshot::from(&source),
            destination: BalanceSnapshot::from(&destination),
            idempotent: false,
        };

        let record = self
            .audit
            .record(
                tx.as_mut(),
                ctx,
                AuditAction::InventoryTransfer,
                transfer.id,
                json!({
                    "productId": request.product_id,
                    "fromWarehouse": request.from_warehouse,
                    "toWarehouse": request.to_warehouse,
                    "quantity": request.quantity,
                    "transferDate": request.transfer_date,
                    "movementId": movement.id,
                    "transactionSetId": set.id,
                }),
            )
            .await?;

        self.post_set(tx.as_mut(), set, &result).await?;
        self.commit(tx, Some(record)).await?;

        tracing::info!(transfer_id = %transfer.id, "stock transferred");
        Ok(result)
    }

    /// Book stock arriving at a warehouse (or one of its locations).
    #[instrument(
        skip(self, ctx, request),
        fields(
            tenant_id = %ctx.tenant_id,
            product_id = %request.product_id,
            warehouse_id = %request.warehouse_id,
            quantity = %request.quantity
        ),
        err
    )]
    pub async fn receive_stock(
        &self,
        ctx: &RequestContext,
        request: ReceiveStockRequest,
    ) -> EngineResult<ReceiveStockResult> {
        ensure_positive_quantity(request.quantity)?;

        self.bounded("receive_stock", async {
            let start = self
                .open_set::<_, ReceiveStockResult>(
                    ctx,
                    TransactionSetKind::Receipt,
                    request.idempotency_key.as_deref(),
                    &request,
                )
                .await?;
            let set_id = match start {
                SetStart::Replayed(result) => return Ok(result),
                SetStart::Proceed(set) => set.id,
            };
            let outcome = self.receive_in_set(ctx, &request, set_id).await;
            self.settle_set(ctx, set_id, outcome).await
        })
        .await
    }

    async fn receive_in_set(
        &self,
        ctx: &RequestContext,
        request: &ReceiveStockRequest,
        set_id: TransactionSetId,
    ) -> EngineResult<ReceiveStockResult> {
        let mut tx = self.begin().await?;
        let set = match self.lock_set(tx.as_mut(), ctx.tenant_id, set_id).await? {
            LockedSet::Draft(set) => set,
            LockedSet::Posted(result) => return Ok(result),
        };

        let mut key = BalanceKey::new(ctx.tenant_id, request.product_id, request.warehouse_id);
        if let Some(location_id) = request.location_id {
            key = key.at_location(location_id);
        }
        let mut balance = tx.lock_or_create_balance(&key).await?;
        balance.receive(request.quantity)?;
        tx.update_balance(&balance).await?;

        let mut movement = InventoryMovement::record(
            ctx.tenant_id,
            MovementType::Receipt,
            request.product_id,
            request.quantity,
            None,
            Some(request.warehouse_id),
            set.id,
            Utc::now(),
        )
        .with_location(request.location_id);
        if let Some(reference) = &request.reference {
            movement = movement.with_reference(reference.as_str());
        }
        tx.insert_movement(&movement).await?;

        let result = ReceiveStockResult {
            movement_id: movement.id,
            transaction_set_id: set.id,
            balance: BalanceSnapshot::from(&balance),
            idempotent: false,
        };

        let record = self
            .audit
            .record(
                tx.as_mut(),
                ctx,
                AuditAction::InventoryReceive,
                movement.id,
                json!({
                    "productId": request.product_id,
                    "warehouseId": request.warehouse_id,
                    "locationId": request.location_id,
                    "quantity": request.quantity,
                    "reference": request.reference,
                    "transactionSetId": set.id,
                }),
            )
            .await?;

        self.post_set(tx.as_mut(), set, &result).await?;
        self.commit(tx, Some(record)).await?;

        tracing::info!(movement_id = %movement.id, on_hand = %result.balance.on_hand, "stock received");
        Ok(result)
    }

    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id), err)]
    pub async fn line_progress(
        &self,
        ctx: &RequestContext,
        document_id: DocumentId,
        line_id: LineId,
    ) -> EngineResult<LineProgressView> {
        self.bounded("line_progress", async {
            let mut tx = self.begin().await?;
            let line = load_line(tx.as_mut(), ctx, document_id, line_id, RowLock::None).await?;
            let history = tx.fulfillments_for_line(ctx.tenant_id, line.id).await?;
            let progress = LineProgress::fold(line.quantity, &history);

            Ok(LineProgressView {
                line_id: line.id,
                ordered: progress.ordered,
                reserved: progress.reserved,
                shipped: progress.shipped,
                returned: progress.returned,
                state: progress.state(),
                remaining_to_fulfill: progress.remaining_to_fulfill(),
            })
        })
        .await
    }

    /// Current balance of a product at a warehouse; zero when no row exists yet.
    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id), err)]
    pub async fn balance(
        &self,
        ctx: &RequestContext,
        product_id: ProductId,
        warehouse_id: WarehouseId,
        location_id: Option<LocationId>,
    ) -> EngineResult<BalanceSnapshot> {
        self.bounded("balance", async {
            let mut key = BalanceKey::new(ctx.tenant_id, product_id, warehouse_id);
            if let Some(location_id) = location_id {
                key = key.at_location(location_id);
            }
            let mut tx = self.begin().await?;
            let balance = tx
                .balance(&key, RowLock::None)
                .await?
                .unwrap_or_else(|| InventoryBalance::empty(key));
            Ok(BalanceSnapshot::from(&balance))
        })
        .await
    }
}

async fn load_line(
    tx: &mut dyn StoreTx,
    ctx: &RequestContext,
    document_id: DocumentId,
    line_id: LineId,
    lock: RowLock,
) -> EngineResult<SalesDocLine> {
    tx.document(ctx.tenant_id, DocumentKind::SalesDoc, document_id, RowLock::None)
        .await?
        .ok_or_else(|| DomainError::not_found(Document::NAME, document_id))?;

    let line = tx.sales_line(ctx.tenant_id, document_id, line_id, lock).await?;
    line.ok_or_else(|| DomainError::not_found("sales_doc_line", line_id).into())
}

/// Lock a source balance; a missing row is an empty balance.
async fn lock_existing(tx: &mut dyn StoreTx, key: &BalanceKey) -> EngineResult<InventoryBalance> {
    Ok(tx
        .balance(key, RowLock::ForUpdate)
        .await?
        .unwrap_or_else(|| InventoryBalance::empty(*key)))
}
