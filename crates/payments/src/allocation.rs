//! Payment allocation rules.
//!
//! A batch is planned as a whole: every line is checked against the figures
//! loaded under lock before anything is written, so a single failing line
//! rejects the entire batch.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use forgeledger_core::money::exceeds;
use forgeledger_core::{
    ALLOCATION_TOLERANCE, AllocationId, ConflictReason, DocumentId, DomainError, DomainResult,
    Entity, PaymentId, TenantId, TenantScoped, UserId,
};

use crate::document::{Document, DocumentKind, DocumentStatus};
use crate::payment::Payment;

/// Document an allocation settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AllocationTarget {
    pub kind: DocumentKind,
    pub id: DocumentId,
}

impl AllocationTarget {
    pub fn sales(id: DocumentId) -> Self {
        Self {
            kind: DocumentKind::SalesDoc,
            id,
        }
    }

    pub fn purchase(id: DocumentId) -> Self {
        Self {
            kind: DocumentKind::PurchaseDoc,
            id,
        }
    }
}

impl core::fmt::Display for AllocationTarget {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

/// Link between a payment and a document it settles.
///
/// Rows are never deleted. Releasing an allocation zeroes its amount and keeps
/// the row for history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentAllocation {
    pub id: AllocationId,
    pub tenant_id: TenantId,
    pub payment_id: PaymentId,
    pub target: AllocationTarget,
    pub amount: Decimal,
    pub created_at: DateTime<Utc>,
    pub created_by: UserId,
    pub released_at: Option<DateTime<Utc>>,
    pub release_reason: Option<String>,
}

impl PaymentAllocation {
    pub fn is_active(&self) -> bool {
        self.amount > Decimal::ZERO
    }

    /// Zero the allocation. Returns `false` when it was already released.
    pub fn release(&mut self, reason: Option<String>, at: DateTime<Utc>) -> bool {
        if !self.is_active() {
            return false;
        }
        self.amount = Decimal::ZERO;
        self.released_at = Some(at);
        self.release_reason = reason;
        true
    }

    /// Sum of the non-zero allocations in `allocations`.
    pub fn active_total<'a>(allocations: impl IntoIterator<Item = &'a PaymentAllocation>) -> Decimal {
        allocations
            .into_iter()
            .filter(|a| a.is_active())
            .map(|a| a.amount)
            .sum()
    }
}

impl Entity for PaymentAllocation {
    type Id = AllocationId;
    const NAME: &'static str = "payment_allocation";

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl TenantScoped for PaymentAllocation {
    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

/// One requested allocation line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRequest {
    pub target: AllocationTarget,
    pub amount: Decimal,
}

/// A target document together with everything already allocated to it by
/// any payment, drafts included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetPosition {
    pub document: Document,
    pub allocated: Decimal,
}

/// Accepted batch plus the totals it leads to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationPlan {
    pub lines: Vec<AllocationRequest>,
    pub payment_allocated_total: Decimal,
    pub payment_remaining: Decimal,
    /// Allocated total per target after the batch.
    pub target_totals: BTreeMap<AllocationTarget, Decimal>,
}

/// Check a batch against the payment and its targets.
///
/// - `payment_allocated`: current non-zero allocation total of `payment`.
/// - `positions`: every target named in `requests`; a missing entry means the
///   document does not exist for this tenant.
pub fn plan_allocations(
    payment: &Payment,
    payment_allocated: Decimal,
    requests: &[AllocationRequest],
    positions: &BTreeMap<AllocationTarget, TargetPosition>,
) -> DomainResult<AllocationPlan> {
    if requests.is_empty() {
        return Err(DomainError::validation("allocation batch is empty"));
    }
    for req in requests {
        if req.amount <= Decimal::ZERO {
            return Err(DomainError::validation(format!(
                "allocation to {} must be positive, got {}",
                req.target, req.amount
            )));
        }
    }

    payment.ensure_draft()?;

    let expected_kind = payment.kind.target_kind();
    let mut target_totals: BTreeMap<AllocationTarget, Decimal> = BTreeMap::new();

    for req in requests {
        if req.target.kind != expected_kind {
            return Err(DomainError::validation(format!(
                "a {} can only be allocated to {} targets, got {}",
                payment.kind.as_str(),
                expected_kind.as_str(),
                req.target
            )));
        }

        let position = positions
            .get(&req.target)
            .ok_or_else(|| DomainError::not_found(Document::NAME, req.target))?;
        let doc = &position.document;

        if doc.status == DocumentStatus::Void {
            return Err(DomainError::invalid_status(
                Document::NAME,
                req.target,
                doc.status,
                "not void",
            ));
        }
        if doc.currency != payment.currency {
            return Err(DomainError::validation(format!(
                "currency mismatch for {}: payment is {}, document is {}",
                req.target, payment.currency, doc.currency
            )));
        }

        let running = target_totals
            .entry(req.target)
            .or_insert(position.allocated);
        if exceeds(*running + req.amount, doc.total_amount, ALLOCATION_TOLERANCE) {
            return Err(DomainError::conflict(ConflictReason::AllocationExceedsDocument {
                target: req.target.to_string(),
                allocated: *running,
                total: doc.total_amount,
                requested: req.amount,
            }));
        }
        *running += req.amount;
    }

    let batch_total: Decimal = requests.iter().map(|r| r.amount).sum();
    if exceeds(payment_allocated + batch_total, payment.amount, ALLOCATION_TOLERANCE) {
        return Err(DomainError::conflict(ConflictReason::AllocationExceedsPayment {
            payment: payment.id.to_string(),
            allocated: payment_allocated,
            amount: payment.amount,
            requested: batch_total,
        }));
    }

    let payment_allocated_total = payment_allocated + batch_total;
    Ok(AllocationPlan {
        lines: requests.to_vec(),
        payment_allocated_total,
        payment_remaining: payment.amount - payment_allocated_total,
        target_totals,
    })
}
