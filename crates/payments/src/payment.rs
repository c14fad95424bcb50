use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use forgeledger_core::{
    ConflictReason, DomainError, DomainResult, Entity, JournalEntryId, Lifecycle, PartyId,
    PaymentId, TenantId, TenantScoped,
};

use crate::document::DocumentKind;

/// Direction of a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentKind {
    /// Money in from a customer; settles sales documents.
    Receipt,
    /// Money out to a supplier; settles purchase documents.
    Payment,
}

impl PaymentKind {
    /// The only document kind this payment may be allocated to.
    pub fn target_kind(self) -> DocumentKind {
        match self {
            PaymentKind::Receipt => DocumentKind::SalesDoc,
            PaymentKind::Payment => DocumentKind::PurchaseDoc,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PaymentKind::Receipt => "receipt",
            PaymentKind::Payment => "payment",
        }
    }
}

impl core::str::FromStr for PaymentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "receipt" => Ok(PaymentKind::Receipt),
            "payment" => Ok(PaymentKind::Payment),
            other => Err(format!("unknown payment kind: {other}")),
        }
    }
}

/// Payment status lifecycle: `draft -> posted -> void`, or `draft -> void`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Draft,
    Posted,
    Void,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Draft => "draft",
            PaymentStatus::Posted => "posted",
            PaymentStatus::Void => "void",
        }
    }
}

impl core::str::FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(PaymentStatus::Draft),
            "posted" => Ok(PaymentStatus::Posted),
            "void" => Ok(PaymentStatus::Void),
            other => Err(format!("unknown payment status: {other}")),
        }
    }
}

impl Lifecycle for PaymentStatus {
    const ENTITY: &'static str = "payment";

    fn can_transition_to(self, next: Self) -> bool {
        use PaymentStatus::*;
        matches!((self, next), (Draft, Posted) | (Draft, Void) | (Posted, Void))
    }
}

/// What voiding a payment has to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoidPlan {
    /// Already void: report the earlier reversal (if any), write nothing.
    AlreadyVoid { posted_entry: Option<JournalEntryId> },
    /// Draft payment: flip the status, no ledger impact.
    VoidDraft,
    /// Posted payment: reverse this entry, then flip the status.
    ReversePosted { entry: JournalEntryId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub tenant_id: TenantId,
    pub kind: PaymentKind,
    pub amount: Decimal,
    pub currency: String,
    pub status: PaymentStatus,
    pub party_id: Option<PartyId>,
    pub payment_date: NaiveDate,
    pub journal_entry_id: Option<JournalEntryId>,
}

impl Payment {
    pub fn is_draft(&self) -> bool {
        self.status == PaymentStatus::Draft
    }

    /// Allocation changes are only accepted while the payment is a draft.
    pub fn ensure_draft(&self) -> DomainResult<()> {
        if !self.is_draft() {
            return Err(DomainError::invalid_status(
                Self::NAME,
                self.id,
                self.status,
                "draft",
            ));
        }
        Ok(())
    }

    /// Same contract as [`crate::Document::posting_check`].
    pub fn posting_check(&self) -> DomainResult<Option<JournalEntryId>> {
        match (self.status, self.journal_entry_id) {
            (PaymentStatus::Posted, Some(entry_id)) => Ok(Some(entry_id)),
            (PaymentStatus::Draft, None) => Ok(None),
            (status, _) => Err(DomainError::invalid_status(
                Self::NAME,
                self.id,
                status,
                "draft without a journal entry",
            )),
        }
    }

    pub fn mark_posted(&mut self, entry_id: JournalEntryId) -> DomainResult<()> {
        self.status = self.status.transition(self.id, PaymentStatus::Posted)?;
        self.journal_entry_id = Some(entry_id);
        Ok(())
    }

    /// Decide how to void, given the payment's current non-zero allocation total.
    pub fn void_plan(&self, active_allocated: Decimal) -> DomainResult<VoidPlan> {
        let plan = match (self.status, self.journal_entry_id) {
            (PaymentStatus::Void, posted_entry) => {
                return Ok(VoidPlan::AlreadyVoid { posted_entry });
            }
            (PaymentStatus::Draft, _) => VoidPlan::VoidDraft,
            (PaymentStatus::Posted, Some(entry)) => VoidPlan::ReversePosted { entry },
            (PaymentStatus::Posted, None) => {
                return Err(DomainError::invariant(format!(
                    "posted payment {} has no journal entry",
                    self.id
                )));
            }
        };

        if active_allocated > Decimal::ZERO {
            return Err(DomainError::conflict(ConflictReason::OutstandingAllocations {
                payment: self.id.to_string(),
                active_total: active_allocated,
            }));
        }
        Ok(plan)
    }

    pub fn mark_void(&mut self) -> DomainResult<()> {
        self.status = self.status.transition(self.id, PaymentStatus::Void)?;
        Ok(())
    }
}

impl Entity for Payment {
    type Id = PaymentId;
    const NAME: &'static str = "payment";

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl TenantScoped for Payment {
    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}
