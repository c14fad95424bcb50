//! Closed audit action taxonomy.
//!
//! Actions are `(entity, verb)` pairs. Only the pairs enumerated by
//! [`AuditAction`] exist; anything else is rejected when constructed from parts.

use serde::{Deserialize, Serialize};

/// What kind of row an audit record is about.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEntity {
    JournalEntry,
    SalesDoc,
    PurchaseDoc,
    Payment,
    Fulfillment,
    Inventory,
}

impl AuditEntity {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditEntity::JournalEntry => "journal_entry",
            AuditEntity::SalesDoc => "sales_doc",
            AuditEntity::PurchaseDoc => "purchase_doc",
            AuditEntity::Payment => "payment",
            AuditEntity::Fulfillment => "fulfillment",
            AuditEntity::Inventory => "inventory",
        }
    }
}

/// What happened to the entity.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditVerb {
    Post,
    Reverse,
    Void,
    Allocate,
    Unallocate,
    Reserve,
    Ship,
    Unreserve,
    Return,
    Transfer,
    Receive,
}

impl AuditVerb {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditVerb::Post => "post",
            AuditVerb::Reverse => "reverse",
            AuditVerb::Void => "void",
            AuditVerb::Allocate => "allocate",
            AuditVerb::Unallocate => "unallocate",
            AuditVerb::Reserve => "reserve",
            AuditVerb::Ship => "ship",
            AuditVerb::Unreserve => "unreserve",
            AuditVerb::Return => "return",
            AuditVerb::Transfer => "transfer",
            AuditVerb::Receive => "receive",
        }
    }
}

/// Every audit action the engine can emit.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum AuditAction {
    JournalEntryPost,
    JournalEntryReverse,
    SalesDocPost,
    PurchaseDocPost,
    PaymentPost,
    PaymentVoid,
    PaymentAllocate,
    PaymentUnallocate,
    FulfillmentReserve,
    FulfillmentShip,
    FulfillmentUnreserve,
    FulfillmentReturn,
    InventoryTransfer,
    InventoryReceive,
}

impl AuditAction {
    pub const ALL: [AuditAction; 14] = [
        AuditAction::JournalEntryPost,
        AuditAction::JournalEntryReverse,
        AuditAction::SalesDocPost,
        AuditAction::PurchaseDocPost,
        AuditAction::PaymentPost,
        AuditAction::PaymentVoid,
        AuditAction::PaymentAllocate,
        AuditAction::PaymentUnallocate,
        AuditAction::FulfillmentReserve,
        AuditAction::FulfillmentShip,
        AuditAction::FulfillmentUnreserve,
        AuditAction::FulfillmentReturn,
        AuditAction::InventoryTransfer,
        AuditAction::InventoryReceive,
    ];

    pub fn parts(self) -> (AuditEntity, AuditVerb) {
        use AuditEntity as E;
        use AuditVerb as V;
        match self {
            AuditAction::JournalEntryPost => (E::JournalEntry, V::Post),
            AuditAction::JournalEntryReverse => (E::JournalEntry, V::Reverse),
            AuditAction::SalesDocPost => (E::SalesDoc, V::Post),
            AuditAction::PurchaseDocPost => (E::PurchaseDoc, V::Post),
            AuditAction::PaymentPost => (E::Payment, V::Post),
            AuditAction::PaymentVoid => (E::Payment, V::Void),
            AuditAction::PaymentAllocate => (E::Payment, V::Allocate),
            AuditAction::PaymentUnallocate => (E::Payment, V::Unallocate),
            AuditAction::FulfillmentReserve => (E::Fulfillment, V::Reserve),
            AuditAction::FulfillmentShip => (E::Fulfillment, V::Ship),
            AuditAction::FulfillmentUnreserve => (E::Fulfillment, V::Unreserve),
            AuditAction::FulfillmentReturn => (E::Fulfillment, V::Return),
            AuditAction::InventoryTransfer => (E::Inventory, V::Transfer),
            AuditAction::InventoryReceive => (E::Inventory, V::Receive),
        }
    }

    /// Build an action from its parts; `None` for pairs outside the taxonomy.
    pub fn from_parts(entity: AuditEntity, verb: AuditVerb) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.parts() == (entity, verb))
    }

    pub fn entity(self) -> AuditEntity {
        self.parts().0
    }

    pub fn verb(self) -> AuditVerb {
        self.parts().1
    }

    /// Stable wire name, e.g. `payment.void`.
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::JournalEntryPost => "journal_entry.post",
            AuditAction::JournalEntryReverse => "journal_entry.reverse",
            AuditAction::SalesDocPost => "sales_doc.post",
            AuditAction::PurchaseDocPost => "purchase_doc.post",
            AuditAction::PaymentPost => "payment.post",
            AuditAction::PaymentVoid => "payment.void",
            AuditAction::PaymentAllocate => "payment.allocate",
            AuditAction::PaymentUnallocate => "payment.unallocate",
            AuditAction::FulfillmentReserve => "fulfillment.reserve",
            AuditAction::FulfillmentShip => "fulfillment.ship",
            AuditAction::FulfillmentUnreserve => "fulfillment.unreserve",
            AuditAction::FulfillmentReturn => "fulfillment.return",
            AuditAction::InventoryTransfer => "inventory.transfer",
            AuditAction::InventoryReceive => "inventory.receive",
        }
    }
}

impl core::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<AuditAction> for String {
    fn from(value: AuditAction) -> Self {
        value.as_str().to_string()
    }
}

impl TryFrom<String> for AuditAction {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl core::str::FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| format!("unknown audit action: {s}"))
    }
}
