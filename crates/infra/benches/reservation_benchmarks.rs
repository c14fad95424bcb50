use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use std::sync::Arc;

use chrono::NaiveDate;
use forgeledger_core::{DocumentId, LineId, PaymentId, ProductId, TenantId, UserId, WarehouseId};
use forgeledger_events::{ActionRegistry, InMemoryAuditSink};
use forgeledger_infra::{
    AllocateRequest, EngineConfig, FulfillRequest, InMemoryEngineStore, LedgerEngine,
    RequestContext,
};
use forgeledger_inventory::{BalanceKey, FulfillmentType, InventoryBalance, SalesDocLine};
use forgeledger_payments::{
    AllocationRequest, AllocationTarget, Document, DocumentKind, DocumentStatus, DocumentType,
    Payment, PaymentKind, PaymentStatus,
};
use rust_decimal::Decimal;
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

fn engine(store: &InMemoryEngineStore) -> LedgerEngine {
    LedgerEngine::new(
        Arc::new(store.clone()),
        Arc::new(ActionRegistry::standard()),
        Arc::new(InMemoryAuditSink::new()),
        EngineConfig::default(),
    )
}

fn document(ctx: &RequestContext, doc_type: DocumentType, total: Decimal) -> Document {
    Document {
        id: DocumentId::new(),
        tenant_id: ctx.tenant_id,
        kind: DocumentKind::SalesDoc,
        doc_type,
        status: DocumentStatus::Open,
        currency: "USD".to_string(),
        total_amount: total,
        tax_amount: Decimal::ZERO,
        party_id: None,
        journal_entry_id: None,
    }
}

/// A line ordering far more than will ever be reserved, backed by ample stock.
fn setup_line(rt: &Runtime) -> (LedgerEngine, RequestContext, SalesDocLine, WarehouseId) {
    let store = InMemoryEngineStore::new();
    let ctx = RequestContext::new(TenantId::new(), UserId::new());
    let warehouse = WarehouseId::new();
    let product = ProductId::new();
    let order = document(&ctx, DocumentType::Order, Decimal::from(1_000));
    let line = SalesDocLine {
        id: LineId::new(),
        tenant_id: ctx.tenant_id,
        document_id: order.id,
        product_id: Some(product),
        quantity: Decimal::from(1_000_000_000),
    };
    let key = BalanceKey::new(ctx.tenant_id, product, warehouse);
    let stock = Decimal::from(1_000_000_000);

    rt.block_on(async {
        store.seed_document(order).await;
        store.seed_line(line.clone()).await;
        store
            .seed_balance(InventoryBalance::restore(key, stock, Decimal::ZERO, stock).unwrap())
            .await;
    });
    (engine(&store), ctx, line, warehouse)
}

fn fulfill_request(line: &SalesDocLine, warehouse: WarehouseId, kind: FulfillmentType) -> FulfillRequest {
    FulfillRequest {
        document_id: line.document_id,
        line_id: line.id,
        warehouse_id: warehouse,
        quantity: Decimal::ONE,
        fulfillment_type: kind,
        idempotency_key: None,
    }
}

fn bench_balance_arithmetic(c: &mut Criterion) {
    let mut group = c.benchmark_group("balance_arithmetic");
    group.sample_size(1000);

    group.bench_function("reserve_unreserve", |b| {
        let key = BalanceKey::new(TenantId::new(), ProductId::new(), WarehouseId::new());
        let mut balance =
            InventoryBalance::restore(key, Decimal::from(100), Decimal::ZERO, Decimal::from(100)).unwrap();
        b.iter(|| {
            balance.reserve(black_box(Decimal::ONE)).unwrap();
            balance.unreserve(black_box(Decimal::ONE)).unwrap();
        });
    });

    group.finish();
}

fn bench_reservation_latency(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("reservation_latency");

    group.bench_function("reserve_then_unreserve", |b| {
        let (engine, ctx, line, warehouse) = setup_line(&rt);
        let reserve = fulfill_request(&line, warehouse, FulfillmentType::Reserve);
        let unreserve = fulfill_request(&line, warehouse, FulfillmentType::Unreserve);
        b.iter(|| {
            rt.block_on(async {
                engine.fulfill(&ctx, reserve.clone()).await.unwrap();
                engine.fulfill(&ctx, unreserve.clone()).await.unwrap();
            })
        });
    });

    group.finish();
}

fn bench_contended_reservations(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("contended_reservations");
    group.sample_size(20);

    for tasks in [1usize, 8, 32].iter() {
        group.throughput(Throughput::Elements(*tasks as u64));
        group.bench_with_input(BenchmarkId::from_parameter(tasks), tasks, |b, &tasks| {
            let (engine, ctx, line, warehouse) = setup_line(&rt);
            let reserve = fulfill_request(&line, warehouse, FulfillmentType::Reserve);
            b.iter(|| {
                rt.block_on(async {
                    let handles: Vec<_> = (0..tasks)
                        .map(|_| {
                            let engine = engine.clone();
                            let request = reserve.clone();
                            tokio::spawn(async move { engine.fulfill(&ctx, request).await })
                        })
                        .collect();
                    for handle in handles {
                        handle.await.unwrap().unwrap();
                    }
                })
            });
        });
    }

    group.finish();
}

fn bench_allocation_batch(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("allocation_batch");
    group.sample_size(20);

    for targets in [1usize, 10, 50].iter() {
        group.throughput(Throughput::Elements(*targets as u64));
        group.bench_with_input(BenchmarkId::from_parameter(targets), targets, |b, &targets| {
            let store = InMemoryEngineStore::new();
            let engine = engine(&store);
            let ctx = RequestContext::new(TenantId::new(), UserId::new());
            let invoices: Vec<Document> = (0..targets)
                .map(|_| document(&ctx, DocumentType::Invoice, Decimal::from(1_000_000)))
                .collect();
            rt.block_on(async {
                for invoice in &invoices {
                    store.seed_document(invoice.clone()).await;
                }
            });

            b.iter(|| {
                rt.block_on(async {
                    let payment = Payment {
                        id: PaymentId::new(),
                        tenant_id: ctx.tenant_id,
                        kind: PaymentKind::Receipt,
                        amount: Decimal::from(targets as i64),
                        currency: "USD".to_string(),
                        status: PaymentStatus::Draft,
                        party_id: None,
                        payment_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
                        journal_entry_id: None,
                    };
                    store.seed_payment(payment.clone()).await;
                    let lines = invoices
                        .iter()
                        .map(|invoice| AllocationRequest {
                            target: AllocationTarget::sales(invoice.id),
                            amount: Decimal::ONE,
                        })
                        .collect();
                    engine
                        .allocate(&ctx, AllocateRequest::new(payment.id, lines))
                        .await
                        .unwrap();
                })
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_balance_arithmetic,
    bench_reservation_latency,
    bench_contended_reservations,
    bench_allocation_batch
);
criterion_main!(benches);
