use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use forgeledger_core::{
    DomainResult, Entity, Lifecycle, LocationId, MovementId, ProductId, TenantId, TenantScoped,
    TransactionSetId, WarehouseId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementType {
    Issue,
    Receipt,
    Adjustment,
    Transfer,
}

impl MovementType {
    /// Physical movements are posted together with the balance update;
    /// adjustments only record intent and stay draft.
    pub fn initial_status(self) -> MovementStatus {
        match self {
            MovementType::Adjustment => MovementStatus::Draft,
            MovementType::Issue | MovementType::Receipt | MovementType::Transfer => {
                MovementStatus::Posted
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MovementType::Issue => "issue",
            MovementType::Receipt => "receipt",
            MovementType::Adjustment => "adjustment",
            MovementType::Transfer => "transfer",
        }
    }
}

impl core::str::FromStr for MovementType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "issue" => Ok(MovementType::Issue),
            "receipt" => Ok(MovementType::Receipt),
            "adjustment" => Ok(MovementType::Adjustment),
            "transfer" => Ok(MovementType::Transfer),
            other => Err(format!("unknown movement type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementStatus {
    Draft,
    Posted,
}

impl MovementStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MovementStatus::Draft => "draft",
            MovementStatus::Posted => "posted",
        }
    }
}

impl core::str::FromStr for MovementStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(MovementStatus::Draft),
            "posted" => Ok(MovementStatus::Posted),
            other => Err(format!("unknown movement status: {other}")),
        }
    }
}

impl Lifecycle for MovementStatus {
    const ENTITY: &'static str = "inventory_movement";

    fn can_transition_to(self, next: Self) -> bool {
        matches!((self, next), (MovementStatus::Draft, MovementStatus::Posted))
    }
}

/// One stock event, owned by the transaction set that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryMovement {
    pub id: MovementId,
    pub tenant_id: TenantId,
    pub movement_type: MovementType,
    pub status: MovementStatus,
    pub product_id: ProductId,
    pub quantity: Decimal,
    pub from_warehouse: Option<WarehouseId>,
    pub to_warehouse: Option<WarehouseId>,
    pub location_id: Option<LocationId>,
    pub transaction_set_id: TransactionSetId,
    pub reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl InventoryMovement {
    /// New movement in the status its type calls for.
    pub fn record(
        tenant_id: TenantId,
        movement_type: MovementType,
        product_id: ProductId,
        quantity: Decimal,
        from_warehouse: Option<WarehouseId>,
        to_warehouse: Option<WarehouseId>,
        transaction_set_id: TransactionSetId,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MovementId::new(),
            tenant_id,
            movement_type,
            status: movement_type.initial_status(),
            product_id,
            quantity,
            from_warehouse,
            to_warehouse,
            location_id: None,
            transaction_set_id,
            reference: None,
            created_at,
        }
    }

    pub fn with_location(mut self, location_id: Option<LocationId>) -> Self {
        self.location_id = location_id;
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn mark_posted(&mut self) -> DomainResult<()> {
        self.status = self.status.transition(self.id, MovementStatus::Posted)?;
        Ok(())
    }
}

impl Entity for InventoryMovement {
    type Id = MovementId;
    const NAME: &'static str = "inventory_movement";

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl TenantScoped for InventoryMovement {
    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}
