//! Decimal tolerances shared by the ledger and allocation rules.

use rust_decimal::Decimal;

/// Maximum absolute difference between total debits and total credits for a
/// journal entry to count as balanced (one cent).
pub const JOURNAL_BALANCE_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Slack applied to allocation conservation checks (1e-6).
pub const ALLOCATION_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 6);

/// `true` when `value` exceeds `limit` by more than `tolerance`.
pub fn exceeds(value: Decimal, limit: Decimal, tolerance: Decimal) -> bool {
    value > limit + tolerance
}
