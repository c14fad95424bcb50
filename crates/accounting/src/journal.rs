use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use forgeledger_core::{
    DomainError, DomainResult, Entity, JOURNAL_BALANCE_TOLERANCE, JournalEntryId, TenantId,
    TenantScoped, UserId,
};

/// Kind of business document an entry was posted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    SalesDoc,
    PurchaseDoc,
    Payment,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::SalesDoc => "sales_doc",
            SourceKind::PurchaseDoc => "purchase_doc",
            SourceKind::Payment => "payment",
        }
    }
}

impl core::str::FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sales_doc" => Ok(SourceKind::SalesDoc),
            "purchase_doc" => Ok(SourceKind::PurchaseDoc),
            "payment" => Ok(SourceKind::Payment),
            other => Err(format!("unknown source kind: {other}")),
        }
    }
}

/// Reference to the document an entry was posted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceRef {
    pub kind: SourceKind,
    pub id: Uuid,
}

/// One side of a journal entry (immutable).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalLine {
    pub line_no: u32,
    pub account_code: String,
    pub debit: Decimal,
    pub credit: Decimal,
    pub description: Option<String>,
}

/// A line before it is numbered and validated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineDraft {
    pub account_code: String,
    pub debit: Decimal,
    pub credit: Decimal,
    pub description: Option<String>,
}

impl LineDraft {
    pub fn debit(account_code: impl Into<String>, amount: Decimal, description: &str) -> Self {
        Self {
            account_code: account_code.into(),
            debit: amount,
            credit: Decimal::ZERO,
            description: Some(description.to_string()),
        }
    }

    pub fn credit(account_code: impl Into<String>, amount: Decimal, description: &str) -> Self {
        Self {
            account_code: account_code.into(),
            debit: Decimal::ZERO,
            credit: amount,
            description: Some(description.to_string()),
        }
    }
}

/// Input for a new journal entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJournalEntry {
    pub id: JournalEntryId,
    pub tenant_id: TenantId,
    pub posting_date: NaiveDate,
    pub entry_date: NaiveDate,
    pub memo: Option<String>,
    pub source: Option<SourceRef>,
    pub posted_at: DateTime<Utc>,
    pub posted_by: UserId,
    pub lines: Vec<LineDraft>,
}

/// Posted journal entry: header plus ordered lines.
///
/// Only obtainable through [`JournalEntry::post`] (validated) or
/// [`JournalEntry::restore`] (rows already persisted), so a held entry always
/// balances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    id: JournalEntryId,
    tenant_id: TenantId,
    posting_date: NaiveDate,
    entry_date: NaiveDate,
    memo: Option<String>,
    source: Option<SourceRef>,
    reverses: Option<JournalEntryId>,
    posted_at: DateTime<Utc>,
    posted_by: UserId,
    lines: Vec<JournalLine>,
}

impl JournalEntry {
    /// Validate and number the lines of a new entry.
    pub fn post(new: NewJournalEntry) -> DomainResult<Self> {
        let lines = validate_lines(new.lines)?;
        Ok(Self {
            id: new.id,
            tenant_id: new.tenant_id,
            posting_date: new.posting_date,
            entry_date: new.entry_date,
            memo: new.memo,
            source: new.source,
            reverses: None,
            posted_at: new.posted_at,
            posted_by: new.posted_by,
            lines,
        })
    }

    /// Rebuild an entry from stored rows.
    ///
    /// Stored entries were validated when posted; a stored entry that no longer
    /// balances is reported as an invariant violation.
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: JournalEntryId,
        tenant_id: TenantId,
        posting_date: NaiveDate,
        entry_date: NaiveDate,
        memo: Option<String>,
        source: Option<SourceRef>,
        reverses: Option<JournalEntryId>,
        posted_at: DateTime<Utc>,
        posted_by: UserId,
        mut lines: Vec<JournalLine>,
    ) -> DomainResult<Self> {
        lines.sort_by_key(|l| l.line_no);
        let entry = Self {
            id,
            tenant_id,
            posting_date,
            entry_date,
            memo,
            source,
            reverses,
            posted_at,
            posted_by,
            lines,
        };
        if !entry.is_balanced() {
            return Err(DomainError::invariant(format!(
                "stored journal entry {id} does not balance"
            )));
        }
        Ok(entry)
    }

    /// Build the entry that cancels this one: same accounts and amounts with
    /// debit and credit swapped.
    pub fn reversal(
        &self,
        id: JournalEntryId,
        posting_date: NaiveDate,
        posted_at: DateTime<Utc>,
        posted_by: UserId,
    ) -> Self {
        let lines = self
            .lines
            .iter()
            .map(|l| JournalLine {
                line_no: l.line_no,
                account_code: l.account_code.clone(),
                debit: l.credit,
                credit: l.debit,
                description: l.description.clone(),
            })
            .collect();

        Self {
            id,
            tenant_id: self.tenant_id,
            posting_date,
            entry_date: posted_at.date_naive(),
            memo: Some(format!("Reversal of journal entry {}", self.id)),
            source: self.source,
            reverses: Some(self.id),
            posted_at,
            posted_by,
            lines,
        }
    }

    pub fn id_typed(&self) -> JournalEntryId {
        self.id
    }

    pub fn posting_date(&self) -> NaiveDate {
        self.posting_date
    }

    pub fn entry_date(&self) -> NaiveDate {
        self.entry_date
    }

    pub fn memo(&self) -> Option<&str> {
        self.memo.as_deref()
    }

    pub fn source(&self) -> Option<SourceRef> {
        self.source
    }

    pub fn reverses(&self) -> Option<JournalEntryId> {
        self.reverses
    }

    pub fn posted_at(&self) -> DateTime<Utc> {
        self.posted_at
    }

    pub fn posted_by(&self) -> UserId {
        self.posted_by
    }

    pub fn lines(&self) -> &[JournalLine] {
        &self.lines
    }

    pub fn total_debit(&self) -> Decimal {
        self.lines.iter().map(|l| l.debit).sum()
    }

    pub fn total_credit(&self) -> Decimal {
        self.lines.iter().map(|l| l.credit).sum()
    }

    pub fn is_balanced(&self) -> bool {
        (self.total_debit() - self.total_credit()).abs() <= JOURNAL_BALANCE_TOLERANCE
    }

    /// Account codes referenced by the lines, deduplicated, in line order.
    pub fn account_codes(&self) -> Vec<&str> {
        let mut codes: Vec<&str> = Vec::new();
        for line in &self.lines {
            if !codes.contains(&line.account_code.as_str()) {
                codes.push(&line.account_code);
            }
        }
        codes
    }
}

impl Entity for JournalEntry {
    type Id = JournalEntryId;
    const NAME: &'static str = "journal_entry";

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl TenantScoped for JournalEntry {
    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

fn validate_lines(drafts: Vec<LineDraft>) -> DomainResult<Vec<JournalLine>> {
    if drafts.len() < 2 {
        return Err(DomainError::validation(
            "journal entry needs at least two lines",
        ));
    }

    let mut debit_total = Decimal::ZERO;
    let mut credit_total = Decimal::ZERO;
    let mut lines = Vec::with_capacity(drafts.len());

    for (idx, draft) in drafts.into_iter().enumerate() {
        let line_no = idx as u32 + 1;
        if draft.account_code.trim().is_empty() {
            return Err(DomainError::validation(format!(
                "line {line_no}: account code cannot be empty"
            )));
        }
        if draft.debit < Decimal::ZERO || draft.credit < Decimal::ZERO {
            return Err(DomainError::validation(format!(
                "line {line_no}: amounts cannot be negative"
            )));
        }
        if (draft.debit > Decimal::ZERO) == (draft.credit > Decimal::ZERO) {
            return Err(DomainError::validation(format!(
                "line {line_no}: exactly one of debit or credit must be positive"
            )));
        }

        debit_total += draft.debit;
        credit_total += draft.credit;
        lines.push(JournalLine {
            line_no,
            account_code: draft.account_code,
            debit: draft.debit,
            credit: draft.credit,
            description: draft.description,
        });
    }

    if (debit_total - credit_total).abs() > JOURNAL_BALANCE_TOLERANCE {
        return Err(DomainError::validation(format!(
            "journal entry is not balanced: debits {debit_total}, credits {credit_total}"
        )));
    }

    Ok(lines)
}
