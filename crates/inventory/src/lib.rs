//! Inventory domain module: balances, movements, fulfillment and transaction sets.
//!
//! Deterministic domain logic only (no IO, no storage). Callers load rows under
//! lock, run the mutation here, and persist whatever comes back.

pub mod balance;
pub mod fulfillment;
pub mod movement;
pub mod transaction_set;
pub mod transfer;

pub use balance::{BalanceKey, InventoryBalance};
pub use fulfillment::{FulfillmentType, LineProgress, LineState, SalesDocLine, SalesFulfillment};
pub use movement::{InventoryMovement, MovementStatus, MovementType};
pub use transaction_set::{
    Replay, TransactionSet, TransactionSetKind, TransactionSetStatus, request_fingerprint,
};
pub use transfer::{InventoryTransfer, validate_transfer};

use forgeledger_core::{DomainError, DomainResult};
use rust_decimal::Decimal;

/// Quantities passed to inventory operations must be strictly positive.
pub fn ensure_positive_quantity(quantity: Decimal) -> DomainResult<()> {
    if quantity <= Decimal::ZERO {
        return Err(DomainError::validation(format!(
            "quantity must be positive, got {quantity}"
        )));
    }
    Ok(())
}
