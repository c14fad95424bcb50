use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use forgeledger_core::{
    DocumentId, DomainError, DomainResult, Entity, JournalEntryId, Lifecycle, PartyId, TenantId,
    TenantScoped,
};

/// Which side of the business a document belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    SalesDoc,
    PurchaseDoc,
}

impl DocumentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentKind::SalesDoc => "sales_doc",
            DocumentKind::PurchaseDoc => "purchase_doc",
        }
    }
}

impl core::str::FromStr for DocumentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sales_doc" => Ok(DocumentKind::SalesDoc),
            "purchase_doc" => Ok(DocumentKind::PurchaseDoc),
            other => Err(format!("unknown document kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Order,
    Invoice,
}

impl DocumentType {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentType::Order => "order",
            DocumentType::Invoice => "invoice",
        }
    }
}

impl core::str::FromStr for DocumentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "order" => Ok(DocumentType::Order),
            "invoice" => Ok(DocumentType::Invoice),
            other => Err(format!("unknown document type: {other}")),
        }
    }
}

/// Document status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Draft,
    Open,
    Posted,
    Void,
}

impl DocumentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentStatus::Draft => "draft",
            DocumentStatus::Open => "open",
            DocumentStatus::Posted => "posted",
            DocumentStatus::Void => "void",
        }
    }
}

impl core::str::FromStr for DocumentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(DocumentStatus::Draft),
            "open" => Ok(DocumentStatus::Open),
            "posted" => Ok(DocumentStatus::Posted),
            "void" => Ok(DocumentStatus::Void),
            other => Err(format!("unknown document status: {other}")),
        }
    }
}

impl Lifecycle for DocumentStatus {
    const ENTITY: &'static str = "document";

    fn can_transition_to(self, next: Self) -> bool {
        use DocumentStatus::*;
        matches!(
            (self, next),
            (Draft, Open) | (Draft, Posted) | (Open, Posted) | (Draft, Void) | (Open, Void)
        )
    }
}

/// Sales or purchase document as seen by the engine.
///
/// Allocation reads documents and never changes them; posting is the only
/// engine operation that moves a document's status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub tenant_id: TenantId,
    pub kind: DocumentKind,
    pub doc_type: DocumentType,
    pub status: DocumentStatus,
    pub currency: String,
    pub total_amount: Decimal,
    /// Portion of `total_amount` that is tax.
    pub tax_amount: Decimal,
    pub party_id: Option<PartyId>,
    pub journal_entry_id: Option<JournalEntryId>,
}

impl Document {
    /// Decide whether a post request proceeds.
    ///
    /// `Ok(Some(id))` means the document already carries its posted entry and
    /// the request is an idempotent no-op; `Ok(None)` means post now.
    pub fn posting_check(&self) -> DomainResult<Option<JournalEntryId>> {
        match (self.status, self.journal_entry_id) {
            (DocumentStatus::Posted, Some(entry_id)) => Ok(Some(entry_id)),
            (DocumentStatus::Draft | DocumentStatus::Open, None) => {
                if self.doc_type != DocumentType::Invoice {
                    return Err(DomainError::validation(format!(
                        "only invoices post to the ledger; document {} is an {}",
                        self.id,
                        self.doc_type.as_str()
                    )));
                }
                Ok(None)
            }
            (status, _) => Err(DomainError::invalid_status(
                Self::NAME,
                self.id,
                status,
                "draft or open without a journal entry",
            )),
        }
    }

    pub fn mark_posted(&mut self, entry_id: JournalEntryId) -> DomainResult<()> {
        self.status = self.status.transition(self.id, DocumentStatus::Posted)?;
        self.journal_entry_id = Some(entry_id);
        Ok(())
    }
}

impl Entity for Document {
    type Id = DocumentId;
    const NAME: &'static str = "document";

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl TenantScoped for Document {
    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invoice(status: DocumentStatus) -> Document {
        Document {
            id: DocumentId::new(),
            tenant_id: TenantId::new(),
            kind: DocumentKind::SalesDoc,
            doc_type: DocumentType::Invoice,
            status,
            currency: "USD".to_string(),
            total_amount: Decimal::new(500, 0),
            tax_amount: Decimal::ZERO,
            party_id: None,
            journal_entry_id: None,
        }
    }

    #[test]
    fn open_invoice_is_postable() {
        assert_eq!(invoice(DocumentStatus::Open).posting_check().unwrap(), None);
        assert_eq!(invoice(DocumentStatus::Draft).posting_check().unwrap(), None);
    }

    #[test]
    fn posted_invoice_with_entry_is_idempotent() {
        let mut doc = invoice(DocumentStatus::Open);
        let entry = JournalEntryId::new();
        doc.mark_posted(entry).unwrap();
        assert_eq!(doc.status, DocumentStatus::Posted);
        assert_eq!(doc.posting_check().unwrap(), Some(entry));
    }

    #[test]
    fn void_or_inconsistent_documents_conflict() {
        assert!(invoice(DocumentStatus::Void).posting_check().unwrap_err().is_conflict());
        assert!(invoice(DocumentStatus::Posted).posting_check().unwrap_err().is_conflict());
    }

    #[test]
    fn orders_do_not_post() {
        let mut doc = invoice(DocumentStatus::Open);
        doc.doc_type = DocumentType::Order;
        assert!(doc.posting_check().unwrap_err().is_validation());
    }

    #[test]
    fn posted_document_cannot_be_posted_again() {
        let mut doc = invoice(DocumentStatus::Posted);
        assert!(doc.mark_posted(JournalEntryId::new()).is_err());
    }
}
