mod common;

use rust_decimal::Decimal;

use common::{Fixture, dec};
use forgeledger_core::{AllocationId, ConflictReason, DomainError};
use forgeledger_events::AuditAction;
use forgeledger_infra::{AllocateRequest, AllocationSelector, UnallocateRequest};
use forgeledger_payments::{
    AllocationRequest, AllocationTarget, DocumentKind, DocumentStatus, DocumentType, PaymentKind,
};

fn line(target: AllocationTarget, amount: Decimal) -> AllocationRequest {
    AllocationRequest { target, amount }
}

#[tokio::test]
async fn over_allocating_a_document_rejects_the_whole_batch() {
    let f = Fixture::new().await;
    let receipt = f.receipt(dec(1000)).await;
    let invoice_a = f.sales_invoice(dec(500)).await;
    let invoice_b = f.sales_invoice(dec(800)).await;
    let a = AllocationTarget::sales(invoice_a.id);
    let b = AllocationTarget::sales(invoice_b.id);

    let first = f
        .engine
        .allocate(&f.ctx, AllocateRequest::new(receipt.id, vec![line(a, dec(300))]))
        .await
        .unwrap();
    assert_eq!(first.payment_allocated_total, dec(300));
    assert_eq!(first.payment_remaining, dec(700));

    // b alone would fit; a does not (300 + 250 > 500)
    let err = f
        .engine
        .allocate(
            &f.ctx,
            AllocateRequest::new(receipt.id, vec![line(b, dec(100)), line(a, dec(250))]),
        )
        .await
        .unwrap_err();
    match err.domain() {
        Some(DomainError::Conflict(ConflictReason::AllocationExceedsDocument {
            allocated,
            total,
            requested,
            ..
        })) => {
            assert_eq!(*allocated, dec(300));
            assert_eq!(*total, dec(500));
            assert_eq!(*requested, dec(250));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let summary = f.engine.document_allocation_summary(&f.ctx, a).await.unwrap();
    assert_eq!(summary.allocated, dec(300));
    assert_eq!(summary.remaining, dec(200));
    let untouched = f.engine.document_allocation_summary(&f.ctx, b).await.unwrap();
    assert_eq!(untouched.allocated, Decimal::ZERO);

    assert_eq!(f.store.allocations(f.ctx.tenant_id).await.len(), 1);
    assert_eq!(f.sink.count(AuditAction::PaymentAllocate), 1);
}

#[tokio::test]
async fn draft_allocations_of_other_payments_count_against_the_document() {
    let f = Fixture::new().await;
    let invoice = f.sales_invoice(dec(500)).await;
    let target = AllocationTarget::sales(invoice.id);
    let first = f.receipt(dec(400)).await;
    let second = f.receipt(dec(400)).await;

    f.engine
        .allocate(&f.ctx, AllocateRequest::new(first.id, vec![line(target, dec(400))]))
        .await
        .unwrap();
    let err = f
        .engine
        .allocate(&f.ctx, AllocateRequest::new(second.id, vec![line(target, dec(101))]))
        .await
        .unwrap_err();
    assert!(err.is_conflict());

    f.engine
        .allocate(&f.ctx, AllocateRequest::new(second.id, vec![line(target, dec(100))]))
        .await
        .unwrap();
    let summary = f.engine.document_allocation_summary(&f.ctx, target).await.unwrap();
    assert_eq!(summary.remaining, Decimal::ZERO);
}

#[tokio::test]
async fn payment_amount_caps_the_batch() {
    let f = Fixture::new().await;
    let receipt = f.receipt(dec(100)).await;
    let a = AllocationTarget::sales(f.sales_invoice(dec(80)).await.id);
    let b = AllocationTarget::sales(f.sales_invoice(dec(80)).await.id);

    let err = f
        .engine
        .allocate(
            &f.ctx,
            AllocateRequest::new(receipt.id, vec![line(a, dec(60)), line(b, dec(60))]),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err.domain(),
        Some(DomainError::Conflict(ConflictReason::AllocationExceedsPayment { .. }))
    ));
    assert!(f.store.allocations(f.ctx.tenant_id).await.is_empty());
}

#[tokio::test]
async fn target_kind_and_currency_are_validated() {
    let f = Fixture::new().await;
    let receipt = f.receipt(dec(100)).await;
    let bill = f.purchase_invoice(dec(100)).await;

    let err = f
        .engine
        .allocate(
            &f.ctx,
            AllocateRequest::new(receipt.id, vec![line(AllocationTarget::purchase(bill.id), dec(10))]),
        )
        .await
        .unwrap_err();
    assert!(err.is_validation());

    let mut euro = f
        .document(DocumentKind::SalesDoc, DocumentType::Invoice, dec(100), Decimal::ZERO)
        .await;
    euro.currency = "EUR".into();
    f.store.seed_document(euro.clone()).await;
    let err = f
        .engine
        .allocate(
            &f.ctx,
            AllocateRequest::new(receipt.id, vec![line(AllocationTarget::sales(euro.id), dec(10))]),
        )
        .await
        .unwrap_err();
    assert!(err.is_validation());
}

#[tokio::test]
async fn void_documents_and_missing_documents_are_rejected() {
    let f = Fixture::new().await;
    let receipt = f.receipt(dec(100)).await;
    let mut void = f.sales_invoice(dec(100)).await;
    void.status = DocumentStatus::Void;
    f.store.seed_document(void.clone()).await;

    let err = f
        .engine
        .allocate(
            &f.ctx,
            AllocateRequest::new(receipt.id, vec![line(AllocationTarget::sales(void.id), dec(10))]),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err.domain(),
        Some(DomainError::Conflict(ConflictReason::InvalidStatus { .. }))
    ));

    let err = f
        .engine
        .allocate(
            &f.ctx,
            AllocateRequest::new(
                receipt.id,
                vec![line(
                    AllocationTarget::sales(forgeledger_core::DocumentId::new()),
                    dec(10),
                )],
            ),
        )
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn posted_payments_cannot_be_allocated() {
    let f = Fixture::new().await;
    let receipt = f.receipt(dec(100)).await;
    let target = AllocationTarget::sales(f.sales_invoice(dec(100)).await.id);
    f.engine.post_payment(&f.ctx, receipt.id).await.unwrap();

    let err = f
        .engine
        .allocate(&f.ctx, AllocateRequest::new(receipt.id, vec![line(target, dec(10))]))
        .await
        .unwrap_err();
    assert!(matches!(
        err.domain(),
        Some(DomainError::Conflict(ConflictReason::InvalidStatus { .. }))
    ));
}

#[tokio::test]
async fn unallocate_zeroes_the_row_and_is_idempotent() {
    let f = Fixture::new().await;
    let receipt = f.receipt(dec(1000)).await;
    let target = AllocationTarget::sales(f.sales_invoice(dec(500)).await.id);
    let allocated = f
        .engine
        .allocate(&f.ctx, AllocateRequest::new(receipt.id, vec![line(target, dec(300))]))
        .await
        .unwrap();
    let allocation_id = allocated.allocations[0].id;

    let request = UnallocateRequest {
        payment_id: receipt.id,
        selector: AllocationSelector::Id(allocation_id),
        reason: Some("wrong invoice".into()),
    };
    let first = f.engine.unallocate(&f.ctx, request.clone()).await.unwrap();
    assert!(!first.idempotent);
    assert_eq!(first.released_amount, dec(300));
    assert_eq!(first.payment_remaining, dec(1000));

    let second = f.engine.unallocate(&f.ctx, request).await.unwrap();
    assert!(second.idempotent);
    assert_eq!(second.released_amount, Decimal::ZERO);

    let rows = f.store.allocations(f.ctx.tenant_id).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].amount, Decimal::ZERO);
    assert_eq!(rows[0].release_reason.as_deref(), Some("wrong invoice"));
    assert_eq!(f.sink.count(AuditAction::PaymentUnallocate), 1);

    let summary = f.engine.payment_summary(&f.ctx, receipt.id).await.unwrap();
    assert_eq!(summary.allocated_total, Decimal::ZERO);
}

#[tokio::test]
async fn unallocate_by_target_releases_every_row_for_it() {
    let f = Fixture::new().await;
    let receipt = f.receipt(dec(1000)).await;
    let target = AllocationTarget::sales(f.sales_invoice(dec(500)).await.id);
    for amount in [dec(100), dec(150)] {
        f.engine
            .allocate(&f.ctx, AllocateRequest::new(receipt.id, vec![line(target, amount)]))
            .await
            .unwrap();
    }

    let result = f
        .engine
        .unallocate(
            &f.ctx,
            UnallocateRequest {
                payment_id: receipt.id,
                selector: AllocationSelector::Target(target),
                reason: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(result.allocation_ids.len(), 2);
    assert_eq!(result.released_amount, dec(250));
    assert_eq!(result.payment_allocated_total, Decimal::ZERO);
}

#[tokio::test]
async fn unallocate_unknown_allocation_is_not_found() {
    let f = Fixture::new().await;
    let receipt = f.receipt(dec(100)).await;

    let err = f
        .engine
        .unallocate(
            &f.ctx,
            UnallocateRequest {
                payment_id: receipt.id,
                selector: AllocationSelector::Id(AllocationId::new()),
                reason: None,
            },
        )
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn allocate_replays_with_the_same_key() {
    let f = Fixture::new().await;
    let payment = f.payment(PaymentKind::Payment, dec(500)).await;
    let target = AllocationTarget::purchase(f.purchase_invoice(dec(500)).await.id);
    let request = AllocateRequest::new(payment.id, vec![line(target, dec(200))])
        .with_idempotency_key("alloc-1");

    let first = f.engine.allocate(&f.ctx, request.clone()).await.unwrap();
    let second = f.engine.allocate(&f.ctx, request).await.unwrap();
    assert!(!first.idempotent);
    assert!(second.idempotent);
    assert_eq!(first.allocations, second.allocations);
    assert_eq!(f.store.allocations(f.ctx.tenant_id).await.len(), 1);

    let different = AllocateRequest::new(payment.id, vec![line(target, dec(300))])
        .with_idempotency_key("alloc-1");
    let err = f.engine.allocate(&f.ctx, different).await.unwrap_err();
    assert!(matches!(
        err.domain(),
        Some(DomainError::Conflict(ConflictReason::IdempotencyKeyReused { .. }))
    ));
}

#[tokio::test]
async fn rejected_allocation_discards_its_draft_set() {
    let f = Fixture::new().await;
    let receipt = f.receipt(dec(100)).await;
    let target = AllocationTarget::sales(f.sales_invoice(dec(50)).await.id);

    let request = AllocateRequest::new(receipt.id, vec![line(target, dec(60))])
        .with_idempotency_key("too-much");
    assert!(f.engine.allocate(&f.ctx, request).await.is_err());
    assert!(f.store.transaction_sets(f.ctx.tenant_id).await.is_empty());

    // the key is free for a corrected request
    let corrected = AllocateRequest::new(receipt.id, vec![line(target, dec(50))])
        .with_idempotency_key("too-much");
    assert!(f.engine.allocate(&f.ctx, corrected).await.is_ok());
}
