use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use forgeledger_core::{AuditId, TenantId, TenantScoped, UserId};

use crate::action::{AuditAction, AuditEntity};

/// One immutable audit row.
///
/// Notes:
/// - **Multi-tenancy** is enforced here via `tenant_id`.
/// - `entity_id` is the primary row the operation changed (payment, fulfillment,
///   transfer, journal entry...).
/// - `metadata` carries the operation summary (amounts, resulting totals).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    id: AuditId,
    tenant_id: TenantId,
    actor_id: UserId,
    action: AuditAction,
    entity_id: Uuid,
    metadata: serde_json::Value,
    recorded_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(
        tenant_id: TenantId,
        actor_id: UserId,
        action: AuditAction,
        entity_id: impl Into<Uuid>,
        metadata: serde_json::Value,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AuditId::new(),
            tenant_id,
            actor_id,
            action,
            entity_id: entity_id.into(),
            metadata,
            recorded_at,
        }
    }

    pub fn id(&self) -> AuditId {
        self.id
    }

    pub fn actor_id(&self) -> UserId {
        self.actor_id
    }

    pub fn action(&self) -> AuditAction {
        self.action
    }

    pub fn entity(&self) -> AuditEntity {
        self.action.entity()
    }

    pub fn entity_id(&self) -> Uuid {
        self.entity_id
    }

    pub fn metadata(&self) -> &serde_json::Value {
        &self.metadata
    }

    pub fn recorded_at(&self) -> DateTime<Utc> {
        self.recorded_at
    }
}

impl TenantScoped for AuditRecord {
    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}
