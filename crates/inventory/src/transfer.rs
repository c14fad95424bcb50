use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use forgeledger_core::{
    DomainError, DomainResult, Entity, MovementId, ProductId, TenantId, TenantScoped,
    TransactionSetId, TransferId, UserId, WarehouseId,
};

use crate::ensure_positive_quantity;

/// Stock moved between two warehouses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryTransfer {
    pub id: TransferId,
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub from_warehouse: WarehouseId,
    pub to_warehouse: WarehouseId,
    pub quantity: Decimal,
    pub transfer_date: NaiveDate,
    pub movement_id: MovementId,
    pub transaction_set_id: TransactionSetId,
    pub created_at: DateTime<Utc>,
    pub created_by: UserId,
}

impl Entity for InventoryTransfer {
    type Id = TransferId;
    const NAME: &'static str = "inventory_transfer";

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl TenantScoped for InventoryTransfer {
    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

pub fn validate_transfer(from: WarehouseId, to: WarehouseId, quantity: Decimal) -> DomainResult<()> {
    if from == to {
        return Err(DomainError::validation(format!(
            "transfer source and destination are both warehouse {from}"
        )));
    }
    ensure_positive_quantity(quantity)
}
