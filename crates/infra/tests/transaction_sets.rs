mod common;

use std::time::Duration;

use rust_decimal::Decimal;

use common::{Fixture, dec};
use forgeledger_core::{ConflictReason, DomainError, LineId, ProductId, WarehouseId};
use forgeledger_events::AuditAction;
use forgeledger_infra::{EngineConfig, EngineError, EngineStore, FulfillRequest, StoreError};
use forgeledger_inventory::{FulfillmentType, SalesDocLine, TransactionSetStatus};

fn reserve(line: &SalesDocLine, warehouse_id: WarehouseId, quantity: Decimal) -> FulfillRequest {
    FulfillRequest {
        document_id: line.document_id,
        line_id: line.id,
        warehouse_id,
        quantity,
        fulfillment_type: FulfillmentType::Reserve,
        idempotency_key: None,
    }
}

#[tokio::test]
async fn failed_commit_leaves_a_draft_set_that_redrives_once() {
    let f = Fixture::new().await;
    let line = f.order_line(dec(10)).await;
    let warehouse = WarehouseId::new();
    let key = f.key(line.product_id.unwrap(), warehouse);
    f.stock(key, dec(10), Decimal::ZERO).await;

    let mut request = reserve(&line, warehouse, dec(3));
    request.idempotency_key = Some("reserve-crash".into());

    f.store.fail_next_movement_commit();
    let err = f.engine.fulfill(&f.ctx, request.clone()).await.unwrap_err();
    assert!(matches!(err, EngineError::Store(StoreError::Backend(_))));

    // the balance write went down with the main transaction
    assert_eq!(f.balance(&key).await.reserved(), Decimal::ZERO);
    assert!(f.store.movements(f.ctx.tenant_id).await.is_empty());

    let sets = f.store.transaction_sets(f.ctx.tenant_id).await;
    assert_eq!(sets.len(), 1);
    assert_eq!(sets[0].status, TransactionSetStatus::Draft);
    let draft_id = sets[0].id;

    tokio::time::sleep(Duration::from_millis(5)).await;
    let stale = f.engine.stale_draft_sets(Some(Duration::ZERO)).await.unwrap();
    assert_eq!(stale.iter().map(|s| s.id).collect::<Vec<_>>(), vec![draft_id]);

    let redriven = f.engine.fulfill(&f.ctx, request.clone()).await.unwrap();
    assert!(!redriven.idempotent);
    assert_eq!(redriven.transaction_set_id, draft_id);
    assert_eq!(f.balance(&key).await.reserved(), dec(3));

    // a further retry replays instead of reserving again
    let replayed = f.engine.fulfill(&f.ctx, request).await.unwrap();
    assert!(replayed.idempotent);
    assert_eq!(replayed.fulfillment_id, redriven.fulfillment_id);
    assert_eq!(f.balance(&key).await.reserved(), dec(3));
    assert_eq!(f.store.movements(f.ctx.tenant_id).await.len(), 1);
    assert_eq!(f.sink.count(AuditAction::FulfillmentReserve), 1);

    let stale = f.engine.stale_draft_sets(Some(Duration::ZERO)).await.unwrap();
    assert!(stale.is_empty());
}

#[tokio::test]
async fn a_key_cannot_be_reused_for_a_different_request() {
    let f = Fixture::new().await;
    let line = f.order_line(dec(10)).await;
    let warehouse = WarehouseId::new();
    f.stock(f.key(line.product_id.unwrap(), warehouse), dec(10), Decimal::ZERO)
        .await;

    let mut first = reserve(&line, warehouse, dec(1));
    first.idempotency_key = Some("k".into());
    f.engine.fulfill(&f.ctx, first.clone()).await.unwrap();

    let mut second = first.clone();
    second.quantity = dec(2);
    let err = f.engine.fulfill(&f.ctx, second).await.unwrap_err();
    assert!(matches!(
        err.domain(),
        Some(DomainError::Conflict(ConflictReason::IdempotencyKeyReused { key })) if key == "k"
    ));
}

#[tokio::test]
async fn keys_are_scoped_to_the_tenant() {
    let f = Fixture::new().await;
    let product = ProductId::new();
    let warehouse = WarehouseId::new();
    let other = f.other_tenant();

    for ctx in [f.ctx, other] {
        let result = f
            .engine
            .receive_stock(
                &ctx,
                forgeledger_infra::ReceiveStockRequest {
                    product_id: product,
                    warehouse_id: warehouse,
                    location_id: None,
                    quantity: dec(5),
                    reference: None,
                    idempotency_key: Some("same-key".into()),
                },
            )
            .await
            .unwrap();
        assert!(!result.idempotent);
        assert_eq!(result.balance.on_hand, dec(5));
    }
    assert_eq!(f.sink.records_for(other.tenant_id).len(), 1);
    assert_eq!(f.sink.records_for(f.ctx.tenant_id).len(), 1);
}

#[tokio::test]
async fn timed_out_operation_writes_nothing() {
    let config = EngineConfig {
        operation_timeout: Duration::from_millis(50),
        ..EngineConfig::default()
    };
    let f = Fixture::with_config(config).await;
    let line = f.order_line(dec(10)).await;
    let warehouse = WarehouseId::new();
    let key = f.key(line.product_id.unwrap(), warehouse);
    f.stock(key, dec(10), Decimal::ZERO).await;

    // an open transaction holds the whole in-memory store
    let blocker = f.store.begin().await.unwrap();
    let err = f
        .engine
        .fulfill(&f.ctx, reserve(&line, warehouse, dec(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Timeout { operation: "fulfill", .. }));
    assert!(err.is_retryable());
    drop(blocker);

    assert!(f.store.transaction_sets(f.ctx.tenant_id).await.is_empty());
    assert_eq!(f.balance(&key).await.reserved(), Decimal::ZERO);
    assert!(f.sink.records().is_empty());
}

#[tokio::test]
async fn domain_rejection_discards_the_draft() {
    let f = Fixture::new().await;
    let line = f.order_line(dec(10)).await;
    let warehouse = WarehouseId::new();

    let mut request = reserve(&line, warehouse, dec(1));
    request.idempotency_key = Some("empty-warehouse".into());
    let err = f.engine.fulfill(&f.ctx, request).await.unwrap_err();
    assert!(err.is_conflict());
    assert!(f.store.transaction_sets(f.ctx.tenant_id).await.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reservations_never_oversell() {
    let f = Fixture::new().await;
    let product = ProductId::new();
    let warehouse = WarehouseId::new();
    let key = f.key(product, warehouse);
    f.stock(key, dec(10), Decimal::ZERO).await;

    let order = f.sales_invoice(dec(1000)).await;
    let line = SalesDocLine {
        id: LineId::new(),
        tenant_id: f.ctx.tenant_id,
        document_id: order.id,
        product_id: Some(product),
        quantity: dec(100),
    };
    f.store.seed_line(line.clone()).await;

    let mut handles = Vec::new();
    for _ in 0..25 {
        let engine = f.engine.clone();
        let ctx = f.ctx;
        let request = reserve(&line, warehouse, dec(1));
        handles.push(tokio::spawn(async move { engine.fulfill(&ctx, request).await }));
    }

    let mut succeeded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(result) => {
                assert!(result.balance.available >= Decimal::ZERO);
                succeeded += 1;
            }
            Err(e) => assert!(e.is_conflict(), "unexpected error: {e}"),
        }
    }

    assert_eq!(succeeded, 10);
    let balance = f.balance(&key).await;
    assert_eq!(balance.reserved(), dec(10));
    assert_eq!(balance.available(), Decimal::ZERO);
    assert!(balance.is_consistent());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_allocations_never_exceed_the_document() {
    let f = Fixture::new().await;
    let invoice = f.sales_invoice(dec(100)).await;
    let target = forgeledger_payments::AllocationTarget::sales(invoice.id);

    let mut handles = Vec::new();
    for _ in 0..6 {
        let receipt = f.receipt(dec(100)).await;
        let engine = f.engine.clone();
        let ctx = f.ctx;
        handles.push(tokio::spawn(async move {
            engine
                .allocate(
                    &ctx,
                    forgeledger_infra::AllocateRequest::new(
                        receipt.id,
                        vec![forgeledger_payments::AllocationRequest {
                            target,
                            amount: dec(40),
                        }],
                    ),
                )
                .await
        }));
    }

    let mut succeeded = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            succeeded += 1;
        }
    }
    assert_eq!(succeeded, 2);
    let summary = f
        .engine
        .document_allocation_summary(&f.ctx, target)
        .await
        .unwrap();
    assert_eq!(summary.allocated, dec(80));
}
