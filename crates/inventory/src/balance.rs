use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use forgeledger_core::{
    DomainError, DomainResult, LocationId, ProductId, TenantId, TenantScoped, WarehouseId,
};

use crate::ensure_positive_quantity;

/// Identity of a balance row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BalanceKey {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub location_id: Option<LocationId>,
}

impl BalanceKey {
    pub fn new(tenant_id: TenantId, product_id: ProductId, warehouse_id: WarehouseId) -> Self {
        Self {
            tenant_id,
            product_id,
            warehouse_id,
            location_id: None,
        }
    }

    pub fn at_location(mut self, location_id: LocationId) -> Self {
        self.location_id = Some(location_id);
        self
    }
}

impl core::fmt::Display for BalanceKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}@{}", self.product_id, self.warehouse_id)?;
        if let Some(location) = self.location_id {
            write!(f, "/{location}")?;
        }
        Ok(())
    }
}

/// Stock position for one product in one warehouse (and optional location).
///
/// Every mutation either succeeds and leaves `available == on_hand - reserved`
/// with `0 <= reserved <= on_hand`, or fails without touching the row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryBalance {
    key: BalanceKey,
    on_hand: Decimal,
    reserved: Decimal,
    available: Decimal,
}

impl InventoryBalance {
    /// Zero balance, used when stock first arrives at a key.
    pub fn empty(key: BalanceKey) -> Self {
        Self {
            key,
            on_hand: Decimal::ZERO,
            reserved: Decimal::ZERO,
            available: Decimal::ZERO,
        }
    }

    /// Rebuild from storage, rejecting rows that break the balance invariant.
    pub fn restore(
        key: BalanceKey,
        on_hand: Decimal,
        reserved: Decimal,
        available: Decimal,
    ) -> DomainResult<Self> {
        let balance = Self {
            key,
            on_hand,
            reserved,
            available,
        };
        if !balance.is_consistent() {
            return Err(DomainError::invariant(format!(
                "balance {key} is inconsistent: on_hand={on_hand} reserved={reserved} available={available}"
            )));
        }
        Ok(balance)
    }

    pub fn key(&self) -> &BalanceKey {
        &self.key
    }

    pub fn on_hand(&self) -> Decimal {
        self.on_hand
    }

    pub fn reserved(&self) -> Decimal {
        self.reserved
    }

    pub fn available(&self) -> Decimal {
        self.available
    }

    pub fn is_consistent(&self) -> bool {
        self.reserved >= Decimal::ZERO
            && self.reserved <= self.on_hand
            && self.available >= Decimal::ZERO
            && self.available == self.on_hand - self.reserved
    }

    /// Hold `quantity` of the available stock.
    pub fn reserve(&mut self, quantity: Decimal) -> DomainResult<()> {
        ensure_positive_quantity(quantity)?;
        if self.available < quantity {
            return Err(DomainError::insufficient("available", self.available, quantity));
        }
        self.reserved += quantity;
        self.recompute();
        Ok(())
    }

    /// Remove `quantity` from stock for a line holding `held` units of the
    /// reservation. At most `held` comes out of `reserved`; the rest must be
    /// unreserved stock, so other lines' reservations stay intact.
    pub fn ship(&mut self, quantity: Decimal, held: Decimal) -> DomainResult<()> {
        ensure_positive_quantity(quantity)?;
        let from_reservation = quantity.min(held).min(self.reserved).max(Decimal::ZERO);
        let unreserved = quantity - from_reservation;
        if self.available < unreserved {
            return Err(DomainError::insufficient("available", self.available, unreserved));
        }
        self.on_hand -= quantity;
        self.reserved -= from_reservation;
        self.recompute();
        Ok(())
    }

    pub fn unreserve(&mut self, quantity: Decimal) -> DomainResult<()> {
        ensure_positive_quantity(quantity)?;
        if self.reserved < quantity {
            return Err(DomainError::insufficient("reserved", self.reserved, quantity));
        }
        self.reserved -= quantity;
        self.recompute();
        Ok(())
    }

    /// Stock arriving: returns, receipts and the inbound side of a transfer.
    pub fn receive(&mut self, quantity: Decimal) -> DomainResult<()> {
        ensure_positive_quantity(quantity)?;
        self.on_hand += quantity;
        self.recompute();
        Ok(())
    }

    /// Outbound side of a transfer. Only unreserved stock may leave.
    pub fn transfer_out(&mut self, quantity: Decimal) -> DomainResult<()> {
        ensure_positive_quantity(quantity)?;
        if self.available < quantity {
            return Err(DomainError::insufficient("available", self.available, quantity));
        }
        self.on_hand -= quantity;
        self.recompute();
        Ok(())
    }

    fn recompute(&mut self) {
        self.available = self.on_hand - self.reserved;
    }
}

impl TenantScoped for InventoryBalance {
    fn tenant_id(&self) -> TenantId {
        self.key.tenant_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forgeledger_core::ConflictReason;
    use proptest::prelude::*;

    fn d(v: i64) -> Decimal {
        Decimal::new(v, 0)
    }

    fn key() -> BalanceKey {
        BalanceKey::new(TenantId::new(), ProductId::new(), WarehouseId::new())
    }

    fn stocked(on_hand: i64) -> InventoryBalance {
        let mut b = InventoryBalance::empty(key());
        b.receive(d(on_hand)).unwrap();
        b
    }

    #[test]
    fn reserve_exhausts_available_then_conflicts() {
        let mut b = stocked(5);
        b.reserve(d(5)).unwrap();
        assert_eq!((b.on_hand(), b.reserved(), b.available()), (d(5), d(5), d(0)));

        let err = b.reserve(d(1)).unwrap_err();
        assert_eq!(
            err,
            DomainError::Conflict(ConflictReason::InsufficientQuantity {
                field: "available",
                available: d(0),
                requested: d(1),
            })
        );
        assert_eq!(b.reserved(), d(5));
    }

    #[test]
    fn ship_then_return() {
        let mut b = stocked(10);
        b.reserve(d(10)).unwrap();
        b.ship(d(10), d(10)).unwrap();
        assert_eq!((b.on_hand(), b.reserved(), b.available()), (d(0), d(0), d(0)));

        b.receive(d(4)).unwrap();
        assert_eq!((b.on_hand(), b.available()), (d(4), d(4)));
    }

    #[test]
    fn ship_beyond_the_reservation_draws_on_available() {
        let mut b = stocked(10);
        b.reserve(d(3)).unwrap();
        b.ship(d(8), d(3)).unwrap();
        assert_eq!((b.on_hand(), b.reserved(), b.available()), (d(2), d(0), d(2)));
    }

    #[test]
    fn unreserved_ship_leaves_other_reservations_alone() {
        let mut b = stocked(10);
        // another line holds 5
        b.reserve(d(5)).unwrap();
        b.ship(d(5), d(0)).unwrap();
        assert_eq!((b.on_hand(), b.reserved(), b.available()), (d(5), d(5), d(0)));

        let err = b.ship(d(1), d(0)).unwrap_err();
        assert_eq!(
            err,
            DomainError::Conflict(ConflictReason::InsufficientQuantity {
                field: "available",
                available: d(0),
                requested: d(1),
            })
        );
        b.unreserve(d(5)).unwrap();
    }

    #[test]
    fn ship_needs_on_hand() {
        let mut b = stocked(2);
        assert!(b.ship(d(3), d(0)).unwrap_err().is_conflict());
        assert_eq!(b.on_hand(), d(2));
    }

    #[test]
    fn unreserve_is_bounded_by_reserved() {
        let mut b = stocked(10);
        b.reserve(d(4)).unwrap();
        assert!(b.unreserve(d(5)).is_err());
        b.unreserve(d(4)).unwrap();
        assert_eq!(b.available(), d(10));
    }

    #[test]
    fn transfer_out_cannot_take_reserved_stock() {
        let mut b = stocked(10);
        b.reserve(d(7)).unwrap();
        assert!(b.transfer_out(d(4)).unwrap_err().is_conflict());
        b.transfer_out(d(3)).unwrap();
        assert_eq!((b.on_hand(), b.reserved(), b.available()), (d(7), d(7), d(0)));
    }

    #[test]
    fn non_positive_quantities_are_validation_errors() {
        let mut b = stocked(10);
        assert!(b.reserve(d(0)).unwrap_err().is_validation());
        assert!(b.receive(d(-1)).unwrap_err().is_validation());
    }

    #[test]
    fn restore_rejects_inconsistent_rows() {
        assert!(InventoryBalance::restore(key(), d(5), d(2), d(3)).is_ok());
        assert!(InventoryBalance::restore(key(), d(5), d(2), d(4)).is_err());
        assert!(InventoryBalance::restore(key(), d(1), d(2), d(-1)).is_err());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Reserve(i64),
        Ship(i64, i64),
        Unreserve(i64),
        Receive(i64),
        TransferOut(i64),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1i64..50).prop_map(Op::Reserve),
            (1i64..50, 0i64..50).prop_map(|(q, held)| Op::Ship(q, held)),
            (1i64..50).prop_map(Op::Unreserve),
            (1i64..50).prop_map(Op::Receive),
            (1i64..50).prop_map(Op::TransferOut),
        ]
    }

    proptest! {
        /// Property: no sequence of operations, accepted or rejected, breaks the
        /// balance invariant, and rejected operations leave the row untouched.
        #[test]
        fn balance_invariant_holds_under_any_sequence(ops in prop::collection::vec(op(), 1..60)) {
            let mut b = InventoryBalance::empty(key());
            for op in ops {
                let before = b.clone();
                let result = match op {
                    Op::Reserve(q) => b.reserve(d(q)),
                    Op::Ship(q, held) => b.ship(d(q), d(held)),
                    Op::Unreserve(q) => b.unreserve(d(q)),
                    Op::Receive(q) => b.receive(d(q)),
                    Op::TransferOut(q) => b.transfer_out(d(q)),
                };
                if result.is_err() {
                    prop_assert_eq!(&b, &before);
                }
                prop_assert!(b.is_consistent());
            }
        }
    }
}
