//! Payment allocation service.
//!
//! Conservation is checked against figures read under lock: the payment row
//! first, then each target document in sorted order. Two draft payments racing
//! for the same invoice serialize on the document lock, and the second one sees
//! the first one's allocation in `allocated_to_document`.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::instrument;

use forgeledger_core::{AllocationId, DomainError, Entity, PaymentId, TransactionSetId};
use forgeledger_events::AuditAction;
use forgeledger_inventory::TransactionSetKind;
use forgeledger_payments::{
    AllocationRequest, AllocationTarget, Document, PaymentAllocation, PaymentStatus,
    TargetPosition, plan_allocations,
};

use crate::engine::{LedgerEngine, RequestContext};
use crate::error::EngineResult;
use crate::posting::lock_payment;
use crate::store::RowLock;
use crate::transaction_set::{LockedSet, Recorded, SetStart};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocateRequest {
    pub payment_id: PaymentId,
    pub lines: Vec<AllocationRequest>,
    #[serde(skip)]
    pub idempotency_key: Option<String>,
}

impl AllocateRequest {
    pub fn new(payment_id: PaymentId, lines: Vec<AllocationRequest>) -> Self {
        Self {
            payment_id,
            lines,
            idempotency_key: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocateResult {
    pub allocations: Vec<PaymentAllocation>,
    pub payment_allocated_total: Decimal,
    pub payment_remaining: Decimal,
    pub transaction_set_id: TransactionSetId,
    pub idempotent: bool,
}

impl Recorded for AllocateResult {
    fn replayed(mut self) -> Self {
        self.idempotent = true;
        self
    }
}

/// Which allocation rows an unallocate call releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationSelector {
    Id(AllocationId),
    /// Every row of the payment pointing at this document.
    Target(AllocationTarget),
}

impl AllocationSelector {
    fn matches(&self, allocation: &PaymentAllocation) -> bool {
        match self {
            AllocationSelector::Id(id) => allocation.id == *id,
            AllocationSelector::Target(target) => allocation.target == *target,
        }
    }
}

impl core::fmt::Display for AllocationSelector {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            AllocationSelector::Id(id) => write!(f, "{id}"),
            AllocationSelector::Target(target) => write!(f, "{target}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnallocateRequest {
    pub payment_id: PaymentId,
    pub selector: AllocationSelector,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnallocateResult {
    pub payment_id: PaymentId,
    /// Rows the selector resolved to.
    pub allocation_ids: Vec<AllocationId>,
    pub released_amount: Decimal,
    pub payment_allocated_total: Decimal,
    pub payment_remaining: Decimal,
    /// Every selected row was already zero; nothing was written.
    pub idempotent: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSummary {
    pub payment_id: PaymentId,
    pub amount: Decimal,
    pub status: PaymentStatus,
    pub allocated_total: Decimal,
    pub remaining: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentAllocationSummary {
    pub target: AllocationTarget,
    pub total: Decimal,
    /// Non-zero allocations across all payments, drafts included.
    pub allocated: Decimal,
    pub remaining: Decimal,
}

impl LedgerEngine {
    /// Allocate a draft payment to one or more documents, all or nothing.
    #[instrument(
        skip(self, ctx, request),
        fields(tenant_id = %ctx.tenant_id, payment_id = %request.payment_id, lines = request.lines.len()),
        err
    )]
    pub async fn allocate(&self, ctx: &RequestContext, request: AllocateRequest) -> EngineResult<AllocateResult> {
        self.bounded("allocate", async {
            let start = self
                .open_set::<_, AllocateResult>(
                    ctx,
                    TransactionSetKind::Allocation,
                    request.idempotency_key.as_deref(),
                    &request,
                )
                .await?;
            let set_id = match start {
                SetStart::Replayed(result) => return Ok(result),
                SetStart::Proceed(set) => set.id,
            };
            let outcome = self.allocate_in_set(ctx, &request, set_id).await;
            self.settle_set(ctx, set_id, outcome).await
        })
        .await
    }

    async fn allocate_in_set(
        &self,
        ctx: &RequestContext,
        request: &AllocateRequest,
        set_id: TransactionSetId,
    ) -> EngineResult<AllocateResult> {
        let mut tx = self.begin().await?;
        let set = match self.lock_set(tx.as_mut(), ctx.tenant_id, set_id).await? {
            LockedSet::Draft(set) => set,
            LockedSet::Posted(result) => return Ok(result),
        };

        let payment = lock_payment(tx.as_mut(), ctx, request.payment_id).await?;
        let existing = tx
            .allocations_for_payment(ctx.tenant_id, request.payment_id)
            .await?;
        let payment_allocated = PaymentAllocation::active_total(&existing);

        let targets: BTreeSet<AllocationTarget> = request.lines.iter().map(|l| l.target).collect();
        let mut positions = BTreeMap::new();
        for target in targets {
            // Missing documents are reported by the planner with the failing line.
            let Some(document) = tx
                .document(ctx.tenant_id, target.kind, target.id, RowLock::ForUpdate)
                .await?
            else {
                continue;
            };
            let allocated = tx.allocated_to_document(ctx.tenant_id, target).await?;
            positions.insert(target, TargetPosition { document, allocated });
        }

        let plan = match plan_allocations(&payment, payment_allocated, &request.lines, &positions) {
            Ok(plan) => plan,
            Err(e) => {
                tracing::warn!(payment_id = %request.payment_id, error = %e, "allocation rejected");
                return Err(e.into());
            }
        };

        let now = Utc::now();
        let allocations: Vec<PaymentAllocation> = plan
            .lines
            .iter()
            .map(|line| PaymentAllocation {
                id: AllocationId::new(),
                tenant_id: ctx.tenant_id,
                payment_id: payment.id,
                target: line.target,
                amount: line.amount,
                created_at: now,
                created_by: ctx.actor_id,
                released_at: None,
                release_reason: None,
            })
            .collect();
        for allocation in &allocations {
            tx.insert_allocation(allocation).await?;
        }

        let result = AllocateResult {
            allocations,
            payment_allocated_total: plan.payment_allocated_total,
            payment_remaining: plan.payment_remaining,
            transaction_set_id: set.id,
            idempotent: false,
        };

        let lines: Vec<_> = result
            .allocations
            .iter()
            .map(|a| {
                json!({
                    "allocationId": a.id,
                    "targetType": a.target.kind.as_str(),
                    "targetId": a.target.id,
                    "amount": a.amount,
                    "documentAllocatedTotal": plan.target_totals.get(&a.target),
                })
            })
            .collect();
        let record = self
            .audit
            .record(
                tx.as_mut(),
                ctx,
                AuditAction::PaymentAllocate,
                payment.id,
                json!({
                    "allocations": lines,
                    "paymentAllocatedTotal": result.payment_allocated_total,
                    "paymentRemaining": result.payment_remaining,
                    "transactionSetId": set.id,
                }),
            )
            .await?;

        self.post_set(tx.as_mut(), set, &result).await?;
        self.commit(tx, Some(record)).await?;

        tracing::info!(
            payment_id = %payment.id,
            allocated = %result.payment_allocated_total,
            remaining = %result.payment_remaining,
            "payment allocated"
        );
        Ok(result)
    }

    /// Release allocations of a draft payment. Rows are zeroed, never deleted.
    #[instrument(
        skip(self, ctx, request),
        fields(tenant_id = %ctx.tenant_id, payment_id = %request.payment_id, selector = %request.selector),
        err
    )]
    pub async fn unallocate(
        &self,
        ctx: &RequestContext,
        request: UnallocateRequest,
    ) -> EngineResult<UnallocateResult> {
        self.bounded("unallocate", async {
            let mut tx = self.begin().await?;
            let payment = lock_payment(tx.as_mut(), ctx, request.payment_id).await?;
            payment.ensure_draft()?;

            let mut allocations = tx
                .allocations_for_payment(ctx.tenant_id, request.payment_id)
                .await?;
            let allocation_ids: Vec<AllocationId> = allocations
                .iter()
                .filter(|a| request.selector.matches(a))
                .map(|a| a.id)
                .collect();
            if allocation_ids.is_empty() {
                return Err(DomainError::not_found(PaymentAllocation::NAME, request.selector).into());
            }

            let now = Utc::now();
            let mut released = Vec::new();
            let mut released_amount = Decimal::ZERO;
            for allocation in allocations.iter_mut().filter(|a| request.selector.matches(a)) {
                let amount = allocation.amount;
                if allocation.release(request.reason.clone(), now) {
                    released_amount += amount;
                    released.push(allocation.id);
                    tx.update_allocation(allocation).await?;
                }
            }

            let payment_allocated_total = PaymentAllocation::active_total(&allocations);
            let mut result = UnallocateResult {
                payment_id: payment.id,
                allocation_ids,
                released_amount,
                payment_allocated_total,
                payment_remaining: payment.amount - payment_allocated_total,
                idempotent: released.is_empty(),
            };

            if result.idempotent {
                tracing::info!(payment_id = %payment.id, "allocations already released");
                return Ok(result);
            }

            let record = self
                .audit
                .record(
                    tx.as_mut(),
                    ctx,
                    AuditAction::PaymentUnallocate,
                    payment.id,
                    json!({
                        "allocationIds": released,
                        "releasedAmount": released_amount,
                        "paymentAllocatedTotal": result.payment_allocated_total,
                        "paymentRemaining": result.payment_remaining,
                        "reason": request.reason,
                    }),
                )
                .await?;
            self.commit(tx, Some(record)).await?;

            result.allocation_ids = released;
            tracing::info!(
                payment_id = %payment.id,
                released = %released_amount,
                remaining = %result.payment_remaining,
                "allocations released"
            );
            Ok(result)
        })
        .await
    }

    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id), err)]
    pub async fn payment_summary(&self, ctx: &RequestContext, payment_id: PaymentId) -> EngineResult<PaymentSummary> {
        self.bounded("payment_summary", async {
            let mut tx = self.begin().await?;
            let payment = tx
                .payment(ctx.tenant_id, payment_id, RowLock::None)
                .await?
                .ok_or_else(|| DomainError::not_found("payment", payment_id))?;
            let allocations = tx.allocations_for_payment(ctx.tenant_id, payment_id).await?;
            let allocated_total = PaymentAllocation::active_total(&allocations);

            Ok(PaymentSummary {
                payment_id,
                amount: payment.amount,
                status: payment.status,
                allocated_total,
                remaining: payment.amount - allocated_total,
            })
        })
        .await
    }

    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id, target = %target), err)]
    pub async fn document_allocation_summary(
        &self,
        ctx: &RequestContext,
        target: AllocationTarget,
    ) -> EngineResult<DocumentAllocationSummary> {
        self.bounded("document_allocation_summary", async {
            let mut tx = self.begin().await?;
            let document = tx
                .document(ctx.tenant_id, target.kind, target.id, RowLock::None)
                .await?
                .ok_or_else(|| DomainError::not_found(Document::NAME, target))?;
            let allocated = tx.allocated_to_document(ctx.tenant_id, target).await?;

            Ok(DocumentAllocationSummary {
                target,
                total: document.total_amount,
                allocated,
                remaining: document.total_amount - allocated,
            })
        })
        .await
    }
}
