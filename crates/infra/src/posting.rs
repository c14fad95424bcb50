//! Ledger posting service: documents and payments to journal entries, voids
//! to reversing entries.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::instrument;

use forgeledger_accounting::{
    JournalEntry, LineDraft, NewJournalEntry, PostingSource, SourceKind, SourceRef, posting_lines,
};
use forgeledger_core::{DocumentId, DomainError, Entity, JournalEntryId, PaymentId};
use forgeledger_events::AuditAction;
use forgeledger_payments::{
    Document, DocumentKind, Payment, PaymentAllocation, PaymentKind, VoidPlan,
};

use crate::engine::{LedgerEngine, RequestContext};
use crate::error::EngineResult;
use crate::store::{RowLock, StoreTx};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostResult {
    pub journal_entry_id: JournalEntryId,
    /// The source was already posted; nothing was written.
    pub idempotent: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoidResult {
    pub payment_id: PaymentId,
    /// Present when the payment had been posted.
    pub reversal_entry_id: Option<JournalEntryId>,
    pub idempotent: bool,
}

/// A journal entry keyed in directly rather than derived from a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualJournalEntry {
    pub posting_date: NaiveDate,
    pub memo: Option<String>,
    pub lines: Vec<LineDraft>,
}

impl LedgerEngine {
    /// Post a sales or purchase invoice.
    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id, actor_id = %ctx.actor_id), err)]
    pub async fn post_document(
        &self,
        ctx: &RequestContext,
        kind: DocumentKind,
        document_id: DocumentId,
    ) -> EngineResult<PostResult> {
        self.bounded("post_document", async {
            let mut tx = self.begin().await?;
            let mut document = tx
                .document(ctx.tenant_id, kind, document_id, RowLock::ForUpdate)
                .await?
                .ok_or_else(|| DomainError::not_found(Document::NAME, document_id))?;

            if let Some(journal_entry_id) = document.posting_check()? {
                tracing::info!(%document_id, %journal_entry_id, "document already posted");
                return Ok(PostResult {
                    journal_entry_id,
                    idempotent: true,
                });
            }

            let (source, source_kind, action) = match kind {
                DocumentKind::SalesDoc => (
                    PostingSource::SalesInvoice {
                        total: document.total_amount,
                        tax: document.tax_amount,
                    },
                    SourceKind::SalesDoc,
                    AuditAction::SalesDocPost,
                ),
                DocumentKind::PurchaseDoc => (
                    PostingSource::PurchaseInvoice {
                        total: document.total_amount,
                        tax: document.tax_amount,
                    },
                    SourceKind::PurchaseDoc,
                    AuditAction::PurchaseDocPost,
                ),
            };

            let now = Utc::now();
            let entry = self
                .post_entry(
                    tx.as_mut(),
                    ctx,
                    NewJournalEntry {
                        id: JournalEntryId::new(),
                        tenant_id: ctx.tenant_id,
                        posting_date: now.date_naive(),
                        entry_date: now.date_naive(),
                        memo: Some(format!("{} {}", kind.as_str(), document_id)),
                        source: Some(SourceRef {
                            kind: source_kind,
                            id: document_id.into(),
                        }),
                        posted_at: now,
                        posted_by: ctx.actor_id,
                        lines: posting_lines(&source, &self.config.posting_accounts)?,
                    },
                )
                .await?;

            document.mark_posted(entry.id_typed())?;
            tx.update_document(&document).await?;

            let record = self
                .audit
                .record(
                    tx.as_mut(),
                    ctx,
                    action,
                    document_id,
                    json!({
                        "journalEntryId": entry.id_typed(),
                        "total": document.total_amount,
                        "tax": document.tax_amount,
                    }),
                )
                .await?;
            self.commit(tx, Some(record)).await?;

            tracing::info!(%document_id, journal_entry_id = %entry.id_typed(), "document posted");
            Ok(PostResult {
                journal_entry_id: entry.id_typed(),
                idempotent: false,
            })
        })
        .await
    }

    /// Post a draft payment: receipts against receivable, disbursements against payable.
    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id, actor_id = %ctx.actor_id), err)]
    pub async fn post_payment(&self, ctx: &RequestContext, payment_id: PaymentId) -> EngineResult<PostResult> {
        self.bounded("post_payment", async {
            let mut tx = self.begin().await?;
            let mut payment = lock_payment(tx.as_mut(), ctx, payment_id).await?;

            if let Some(journal_entry_id) = payment.posting_check()? {
                tracing::info!(%payment_id, %journal_entry_id, "payment already posted");
                return Ok(PostResult {
                    journal_entry_id,
                    idempotent: true,
                });
            }

            let source = match payment.kind {
                PaymentKind::Receipt => PostingSource::Receipt {
                    amount: payment.amount,
                },
                PaymentKind::Payment => PostingSource::Disbursement {
                    amount: payment.amount,
                },
            };

            let now = Utc::now();
            let entry = self
                .post_entry(
                    tx.as_mut(),
                    ctx,
                    NewJournalEntry {
                        id: JournalEntryId::new(),
                        tenant_id: ctx.tenant_id,
                        posting_date: payment.payment_date,
                        entry_date: now.date_naive(),
                        memo: Some(format!("{} {}", payment.kind.as_str(), payment_id)),
                        source: Some(SourceRef {
                            kind: SourceKind::Payment,
                            id: payment_id.into(),
                        }),
                        posted_at: now,
                        posted_by: ctx.actor_id,
                        lines: posting_lines(&source, &self.config.posting_accounts)?,
                    },
                )
                .await?;

            payment.mark_posted(entry.id_typed())?;
            tx.update_payment(&payment).await?;

            let record = self
                .audit
                .record(
                    tx.as_mut(),
                    ctx,
                    AuditAction::PaymentPost,
                    payment_id,
                    json!({
                        "journalEntryId": entry.id_typed(),
                        "amount": payment.amount,
                        "currency": payment.currency,
                    }),
                )
                .await?;
            self.commit(tx, Some(record)).await?;

            tracing::info!(%payment_id, journal_entry_id = %entry.id_typed(), "payment posted");
            Ok(PostResult {
                journal_entry_id: entry.id_typed(),
                idempotent: false,
            })
        })
        .await
    }

    /// Void a payment. A posted payment gets a reversing entry first.
    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id, actor_id = %ctx.actor_id), err)]
    pub async fn void_payment(&self, ctx: &RequestContext, payment_id: PaymentId) -> EngineResult<VoidResult> {
        self.bounded("void_payment", async {
            let mut tx = self.begin().await?;
            let mut payment = lock_payment(tx.as_mut(), ctx, payment_id).await?;
            let previous_status = payment.status;

            let allocations = tx.allocations_for_payment(ctx.tenant_id, payment_id).await?;
            let active = PaymentAllocation::active_total(&allocations);

            let reversal_entry_id = match payment.void_plan(active)? {
                VoidPlan::AlreadyVoid { posted_entry } => {
                    let reversal_entry_id = match posted_entry {
                        Some(entry_id) => tx
                            .reversal_of(ctx.tenant_id, entry_id)
                            .await?
                            .map(|r| r.id_typed()),
                        None => None,
                    };
                    tracing::info!(%payment_id, "payment already void");
                    return Ok(VoidResult {
                        payment_id,
                        reversal_entry_id,
                        idempotent: true,
                    });
                }
                VoidPlan::VoidDraft => None,
                VoidPlan::ReversePosted { entry } => {
                    // The entry may already have been reversed by hand.
                    let reversal = match tx.reversal_of(ctx.tenant_id, entry).await? {
                        Some(existing) => existing,
                        None => self.reverse_entry(tx.as_mut(), ctx, entry).await?,
                    };
                    Some(reversal.id_typed())
                }
            };

            payment.mark_void()?;
            tx.update_payment(&payment).await?;

            let record = self
                .audit
                .record(
                    tx.as_mut(),
                    ctx,
                    AuditAction::PaymentVoid,
                    payment_id,
                    json!({
                        "previousStatus": previous_status.as_str(),
                        "reversalEntryId": reversal_entry_id,
                    }),
                )
                .await?;
            self.commit(tx, Some(record)).await?;

            tracing::info!(%payment_id, ?reversal_entry_id, "payment voided");
            Ok(VoidResult {
                payment_id,
                reversal_entry_id,
                idempotent: false,
            })
        })
        .await
    }

    /// Post a manual journal entry.
    #[instrument(skip(self, ctx, entry), fields(tenant_id = %ctx.tenant_id, lines = entry.lines.len()), err)]
    pub async fn post_journal_entry(
        &self,
        ctx: &RequestContext,
        entry: ManualJournalEntry,
    ) -> EngineResult<JournalEntryId> {
        self.bounded("post_journal_entry", async {
            let mut tx = self.begin().await?;
            let now = Utc::now();
            let posted = self
                .post_entry(
                    tx.as_mut(),
                    ctx,
                    NewJournalEntry {
                        id: JournalEntryId::new(),
                        tenant_id: ctx.tenant_id,
                        posting_date: entry.posting_date,
                        entry_date: now.date_naive(),
                        memo: entry.memo,
                        source: None,
                        posted_at: now,
                        posted_by: ctx.actor_id,
                        lines: entry.lines,
                    },
                )
                .await?;

            let record = self
                .audit
                .record(
                    tx.as_mut(),
                    ctx,
                    AuditAction::JournalEntryPost,
                    posted.id_typed(),
                    json!({
                        "lines": posted.lines().len(),
                        "total": posted.total_debit(),
                    }),
                )
                .await?;
            self.commit(tx, Some(record)).await?;

            tracing::info!(journal_entry_id = %posted.id_typed(), "journal entry posted");
            Ok(posted.id_typed())
        })
        .await
    }

    /// Reverse any posted entry. Reversing twice returns the first reversal.
    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id, actor_id = %ctx.actor_id), err)]
    pub async fn reverse_journal_entry(
        &self,
        ctx: &RequestContext,
        entry_id: JournalEntryId,
    ) -> EngineResult<PostResult> {
        self.bounded("reverse_journal_entry", async {
            let mut tx = self.begin().await?;

            if let Some(existing) = tx.reversal_of(ctx.tenant_id, entry_id).await? {
                tracing::info!(%entry_id, reversal_id = %existing.id_typed(), "entry already reversed");
                return Ok(PostResult {
                    journal_entry_id: existing.id_typed(),
                    idempotent: true,
                });
            }

            let reversal = self.reverse_entry(tx.as_mut(), ctx, entry_id).await?;
            let record = self
                .audit
                .record(
                    tx.as_mut(),
                    ctx,
                    AuditAction::JournalEntryReverse,
                    reversal.id_typed(),
                    json!({ "reverses": entry_id }),
                )
                .await?;
            self.commit(tx, Some(record)).await?;

            tracing::info!(%entry_id, reversal_id = %reversal.id_typed(), "journal entry reversed");
            Ok(PostResult {
                journal_entry_id: reversal.id_typed(),
                idempotent: false,
            })
        })
        .await
    }

    /// Validate `new` against the tenant's chart and insert it.
    async fn post_entry(
        &self,
        tx: &mut dyn StoreTx,
        ctx: &RequestContext,
        new: NewJournalEntry,
    ) -> EngineResult<JournalEntry> {
        let entry = JournalEntry::post(new)?;
        for code in entry.account_codes() {
            if tx.account(ctx.tenant_id, code).await?.is_none() {
                return Err(DomainError::not_found("account", code).into());
            }
        }
        tx.insert_journal_entry(&entry).await?;
        Ok(entry)
    }

    async fn reverse_entry(
        &self,
        tx: &mut dyn StoreTx,
        ctx: &RequestContext,
        entry_id: JournalEntryId,
    ) -> EngineResult<JournalEntry> {
        let original = tx
            .journal_entry(ctx.tenant_id, entry_id)
            .await?
            .ok_or_else(|| DomainError::not_found(JournalEntry::NAME, entry_id))?;

        let now = Utc::now();
        let reversal = original.reversal(JournalEntryId::new(), now.date_naive(), now, ctx.actor_id);
        debug_assert_eq!(reversal.total_debit(), original.total_credit());
        tx.insert_journal_entry(&reversal).await?;
        Ok(reversal)
    }
}

pub(crate) async fn lock_payment(
    tx: &mut dyn StoreTx,
    ctx: &RequestContext,
    payment_id: PaymentId,
) -> EngineResult<Payment> {
    let payment = tx.payment(ctx.tenant_id, payment_id, RowLock::ForUpdate).await?;
    payment.ok_or_else(|| DomainError::not_found(Payment::NAME, payment_id).into())
}
