//! Sales-document line fulfillment.
//!
//! A line's state is never stored. It is folded from the line's fulfillment
//! rows in creation order, so the rows themselves are the only source of truth.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use forgeledger_core::{
    ConflictReason, DocumentId, DomainError, DomainResult, Entity, FulfillmentId, LineId,
    MovementId, ProductId, TenantId, TenantScoped, TransactionSetId, UserId, WarehouseId,
};

use crate::movement::MovementType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FulfillmentType {
    Reserve,
    Ship,
    Unreserve,
    Return,
}

impl FulfillmentType {
    pub fn movement_type(self) -> MovementType {
        match self {
            FulfillmentType::Reserve | FulfillmentType::Unreserve => MovementType::Adjustment,
            FulfillmentType::Ship => MovementType::Issue,
            FulfillmentType::Return => MovementType::Receipt,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FulfillmentType::Reserve => "reserve",
            FulfillmentType::Ship => "ship",
            FulfillmentType::Unreserve => "unreserve",
            FulfillmentType::Return => "return",
        }
    }
}

impl core::str::FromStr for FulfillmentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reserve" => Ok(FulfillmentType::Reserve),
            "ship" => Ok(FulfillmentType::Ship),
            "unreserve" => Ok(FulfillmentType::Unreserve),
            "return" => Ok(FulfillmentType::Return),
            other => Err(format!("unknown fulfillment type: {other}")),
        }
    }
}

/// Line of a sales document, as far as fulfillment cares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesDocLine {
    pub id: LineId,
    pub tenant_id: TenantId,
    pub document_id: DocumentId,
    pub product_id: Option<ProductId>,
    pub quantity: Decimal,
}

impl SalesDocLine {
    /// Lines without a product (services, notes) cannot be fulfilled.
    pub fn product(&self) -> DomainResult<ProductId> {
        self.product_id.ok_or_else(|| {
            DomainError::validation(format!("line {} does not reference a product", self.id))
        })
    }
}

impl Entity for SalesDocLine {
    type Id = LineId;
    const NAME: &'static str = "sales_doc_line";

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl TenantScoped for SalesDocLine {
    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

/// One fulfillment action on a line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesFulfillment {
    pub id: FulfillmentId,
    pub tenant_id: TenantId,
    pub document_id: DocumentId,
    pub line_id: LineId,
    pub fulfillment_type: FulfillmentType,
    pub quantity: Decimal,
    pub warehouse_id: WarehouseId,
    pub movement_id: MovementId,
    pub transaction_set_id: TransactionSetId,
    pub created_at: DateTime<Utc>,
    pub created_by: UserId,
}

impl Entity for SalesFulfillment {
    type Id = FulfillmentId;
    const NAME: &'static str = "sales_fulfillment";

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl TenantScoped for SalesFulfillment {
    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineState {
    Pending,
    Partial,
    Reserved,
    Shipped,
}

impl LineState {
    pub fn as_str(self) -> &'static str {
        match self {
            LineState::Pending => "pending",
            LineState::Partial => "partial",
            LineState::Reserved => "reserved",
            LineState::Shipped => "shipped",
        }
    }
}

/// Cumulative fulfillment totals of a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineProgress {
    pub ordered: Decimal,
    pub reserved: Decimal,
    pub shipped: Decimal,
    pub returned: Decimal,
}

impl LineProgress {
    pub fn new(ordered: Decimal) -> Self {
        Self {
            ordered,
            reserved: Decimal::ZERO,
            shipped: Decimal::ZERO,
            returned: Decimal::ZERO,
        }
    }

    /// Fold rows that are already in creation order.
    pub fn fold<'a>(
        ordered: Decimal,
        fulfillments: impl IntoIterator<Item = &'a SalesFulfillment>,
    ) -> Self {
        fulfillments
            .into_iter()
            .fold(Self::new(ordered), |mut progress, f| {
                progress.apply(f.fulfillment_type, f.quantity);
                progress
            })
    }

    pub fn apply(&mut self, kind: FulfillmentType, quantity: Decimal) {
        match kind {
            FulfillmentType::Reserve => self.reserved += quantity,
            FulfillmentType::Ship => {
                self.reserved = (self.reserved - quantity).max(Decimal::ZERO);
                self.shipped += quantity;
            }
            FulfillmentType::Unreserve => {
                self.reserved = (self.reserved - quantity).max(Decimal::ZERO);
            }
            FulfillmentType::Return => {
                self.shipped = (self.shipped - quantity).max(Decimal::ZERO);
                self.returned += quantity;
            }
        }
    }

    /// Reject actions that would over-fulfill the line or undo more than was done.
    pub fn check(&self, line: LineId, kind: FulfillmentType, quantity: Decimal) -> DomainResult<()> {
        let (field, current, limit) = match kind {
            FulfillmentType::Reserve => ("reserved", self.reserved + self.shipped, self.ordered),
            FulfillmentType::Ship => ("shipped", self.shipped, self.ordered),
            FulfillmentType::Unreserve => ("unreserved", Decimal::ZERO, self.reserved),
            FulfillmentType::Return => ("returned", Decimal::ZERO, self.shipped),
        };
        if current + quantity > limit {
            return Err(DomainError::conflict(ConflictReason::LineQuantityExceeded {
                line: line.to_string(),
                field,
                current,
                limit,
                requested: quantity,
            }));
        }
        Ok(())
    }

    pub fn remaining_to_fulfill(&self) -> Decimal {
        (self.ordered - self.shipped).max(Decimal::ZERO)
    }

    pub fn state(&self) -> LineState {
        if self.ordered > Decimal::ZERO && self.shipped >= self.ordered {
            LineState::Shipped
        } else if self.reserved.is_zero() && self.shipped.is_zero() {
            LineState::Pending
        } else if self.shipped.is_zero() && self.reserved >= self.ordered {
            LineState::Reserved
        } else {
            LineState::Partial
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(v: i64) -> Decimal {
        Decimal::new(v, 0)
    }

    fn row(kind: FulfillmentType, qty: i64) -> SalesFulfillment {
        SalesFulfillment {
            id: FulfillmentId::new(),
            tenant_id: TenantId::new(),
            document_id: DocumentId::new(),
            line_id: LineId::new(),
            fulfillment_type: kind,
            quantity: d(qty),
            warehouse_id: WarehouseId::new(),
            movement_id: MovementId::new(),
            transaction_set_id: TransactionSetId::new(),
            created_at: Utc::now(),
            created_by: UserId::new(),
        }
    }

    #[test]
    fn fold_walks_pending_partial_reserved_shipped() {
        let mut rows = Vec::new();
        assert_eq!(LineProgress::fold(d(10), &rows).state(), LineState::Pending);

        rows.push(row(FulfillmentType::Reserve, 4));
        assert_eq!(LineProgress::fold(d(10), &rows).state(), LineState::Partial);

        rows.push(row(FulfillmentType::Reserve, 6));
        assert_eq!(LineProgress::fold(d(10), &rows).state(), LineState::Reserved);

        rows.push(row(FulfillmentType::Ship, 10));
        let progress = LineProgress::fold(d(10), &rows);
        assert_eq!(progress.state(), LineState::Shipped);
        assert_eq!(progress.reserved, d(0));
        assert_eq!(progress.remaining_to_fulfill(), d(0));
    }

    #[test]
    fn return_reduces_shipped_and_reopens_line() {
        let rows = vec![
            row(FulfillmentType::Ship, 10),
            row(FulfillmentType::Return, 4),
        ];
        let progress = LineProgress::fold(d(10), &rows);
        assert_eq!(progress.shipped, d(6));
        assert_eq!(progress.returned, d(4));
        assert_eq!(progress.remaining_to_fulfill(), d(4));
        assert_eq!(progress.state(), LineState::Partial);
    }

    #[test]
    fn unreserve_back_to_pending() {
        let rows = vec![
            row(FulfillmentType::Reserve, 3),
            row(FulfillmentType::Unreserve, 3),
        ];
        assert_eq!(LineProgress::fold(d(5), &rows).state(), LineState::Pending);
    }

    #[test]
    fn line_guards() {
        let line = LineId::new();
        let progress = LineProgress::fold(
            d(10),
            &[row(FulfillmentType::Reserve, 6), row(FulfillmentType::Ship, 2)],
        );
        // reserved 4, shipped 2
        assert!(progress.check(line, FulfillmentType::Reserve, d(4)).is_ok());
        assert!(progress.check(line, FulfillmentType::Reserve, d(5)).is_err());
        assert!(progress.check(line, FulfillmentType::Ship, d(8)).is_ok());
        assert!(progress.check(line, FulfillmentType::Ship, d(9)).is_err());
        assert!(progress.check(line, FulfillmentType::Unreserve, d(4)).is_ok());
        assert!(progress.check(line, FulfillmentType::Return, d(3)).is_err());

        match progress.check(line, FulfillmentType::Unreserve, d(5)).unwrap_err() {
            DomainError::Conflict(ConflictReason::LineQuantityExceeded { limit, requested, .. }) => {
                assert_eq!(limit, d(4));
                assert_eq!(requested, d(5));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn movement_types_follow_fulfillment_type() {
        assert_eq!(FulfillmentType::Reserve.movement_type(), MovementType::Adjustment);
        assert_eq!(FulfillmentType::Ship.movement_type(), MovementType::Issue);
        assert_eq!(FulfillmentType::Return.movement_type(), MovementType::Receipt);
    }
}
