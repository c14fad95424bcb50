//! Posting rules: which accounts a source document or payment hits.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use forgeledger_core::{DomainError, DomainResult};

use crate::journal::LineDraft;

/// Chart-of-accounts codes used by the posting rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostingAccounts {
    pub cash: String,
    pub receivable: String,
    pub payable: String,
    pub revenue: String,
    pub purchases: String,
    pub tax_payable: String,
    pub tax_receivable: String,
}

impl Default for PostingAccounts {
    fn default() -> Self {
        Self {
            cash: "1000".to_string(),
            receivable: "1200".to_string(),
            payable: "2000".to_string(),
            revenue: "4000".to_string(),
            purchases: "5000".to_string(),
            tax_payable: "2100".to_string(),
            tax_receivable: "1300".to_string(),
        }
    }
}

/// What is being posted, reduced to the amounts the rules need.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostingSource {
    SalesInvoice { total: Decimal, tax: Decimal },
    PurchaseInvoice { total: Decimal, tax: Decimal },
    /// Money received from a customer.
    Receipt { amount: Decimal },
    /// Money paid to a supplier.
    Disbursement { amount: Decimal },
}

/// Compute the journal lines for `source`. Zero-amount lines are omitted.
pub fn posting_lines(source: &PostingSource, accounts: &PostingAccounts) -> DomainResult<Vec<LineDraft>> {
    let mut lines = Vec::with_capacity(3);
    match *source {
        PostingSource::SalesInvoice { total, tax } => {
            let net = net_of_tax(total, tax)?;
            lines.push(LineDraft::debit(&accounts.receivable, total, "Accounts receivable"));
            push_credit(&mut lines, &accounts.revenue, net, "Revenue");
            push_credit(&mut lines, &accounts.tax_payable, tax, "Tax payable");
        }
        PostingSource::PurchaseInvoice { total, tax } => {
            let net = net_of_tax(total, tax)?;
            push_debit(&mut lines, &accounts.purchases, net, "Purchases");
            push_debit(&mut lines, &accounts.tax_receivable, tax, "Tax receivable");
            lines.push(LineDraft::credit(&accounts.payable, total, "Accounts payable"));
        }
        PostingSource::Receipt { amount } => {
            ensure_positive(amount)?;
            lines.push(LineDraft::debit(&accounts.cash, amount, "Cash received"));
            lines.push(LineDraft::credit(&accounts.receivable, amount, "Accounts receivable"));
        }
        PostingSource::Disbursement { amount } => {
            ensure_positive(amount)?;
            lines.push(LineDraft::debit(&accounts.payable, amount, "Accounts payable"));
            lines.push(LineDraft::credit(&accounts.cash, amount, "Cash paid"));
        }
    }
    Ok(lines)
}

fn net_of_tax(total: Decimal, tax: Decimal) -> DomainResult<Decimal> {
    ensure_positive(total)?;
    if tax < Decimal::ZERO || tax > total {
        return Err(DomainError::validation(format!(
            "tax amount {tax} must be between 0 and the total {total}"
        )));
    }
    Ok(total - tax)
}

fn ensure_positive(amount: Decimal) -> DomainResult<()> {
    if amount <= Decimal::ZERO {
        return Err(DomainError::validation(format!(
            "amount to post must be positive, got {amount}"
        )));
    }
    Ok(())
}

fn push_debit(lines: &mut Vec<LineDraft>, account: &str, amount: Decimal, description: &str) {
    if !amount.is_zero() {
        lines.push(LineDraft::debit(account, amount, description));
    }
}

fn push_credit(lines: &mut Vec<LineDraft>, account: &str, amount: Decimal, description: &str) {
    if !amount.is_zero() {
        lines.push(LineDraft::credit(account, amount, description));
    }
}
