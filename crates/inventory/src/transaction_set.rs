//! Transaction sets: the draft→posted unit that groups the rows written by one
//! logical operation.
//!
//! A set is written `draft` before any of its rows and flipped to `posted`
//! in the same transaction as its last row. A set still `draft` after a grace
//! window marks an operation that never completed and must be re-driven with
//! the same idempotency key.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use forgeledger_core::{
    ConflictReason, DomainError, DomainResult, Entity, Lifecycle, TenantId, TenantScoped,
    TransactionSetId, UserId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionSetStatus {
    Draft,
    Posted,
}

impl TransactionSetStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionSetStatus::Draft => "draft",
            TransactionSetStatus::Posted => "posted",
        }
    }
}

impl core::str::FromStr for TransactionSetStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(TransactionSetStatus::Draft),
            "posted" => Ok(TransactionSetStatus::Posted),
            other => Err(format!("unknown transaction set status: {other}")),
        }
    }
}

impl Lifecycle for TransactionSetStatus {
    const ENTITY: &'static str = "transaction_set";

    fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (TransactionSetStatus::Draft, TransactionSetStatus::Posted)
        )
    }
}

/// Operation that opened the set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionSetKind {
    Fulfillment,
    Transfer,
    Receipt,
    Allocation,
}

impl TransactionSetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionSetKind::Fulfillment => "fulfillment",
            TransactionSetKind::Transfer => "transfer",
            TransactionSetKind::Receipt => "receipt",
            TransactionSetKind::Allocation => "allocation",
        }
    }
}

impl core::str::FromStr for TransactionSetKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fulfillment" => Ok(TransactionSetKind::Fulfillment),
            "transfer" => Ok(TransactionSetKind::Transfer),
            "receipt" => Ok(TransactionSetKind::Receipt),
            "allocation" => Ok(TransactionSetKind::Allocation),
            other => Err(format!("unknown transaction set kind: {other}")),
        }
    }
}

/// What a retry carrying an existing idempotency key should do.
#[derive(Debug, Clone, PartialEq)]
pub enum Replay {
    /// The earlier attempt never posted; run the operation again under this set.
    Redrive,
    /// The earlier attempt completed; hand back its recorded result.
    Completed(serde_json::Value),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionSet {
    pub id: TransactionSetId,
    pub tenant_id: TenantId,
    pub kind: TransactionSetKind,
    pub status: TransactionSetStatus,
    pub idempotency_key: Option<String>,
    /// Canonical form of the request that opened the set.
    pub fingerprint: String,
    pub result: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub created_by: UserId,
    pub posted_at: Option<DateTime<Utc>>,
}

impl TransactionSet {
    pub fn open(
        tenant_id: TenantId,
        kind: TransactionSetKind,
        idempotency_key: Option<String>,
        fingerprint: String,
        created_by: UserId,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TransactionSetId::new(),
            tenant_id,
            kind,
            status: TransactionSetStatus::Draft,
            idempotency_key,
            fingerprint,
            result: None,
            created_at,
            created_by,
            posted_at: None,
        }
    }

    pub fn is_draft(&self) -> bool {
        self.status == TransactionSetStatus::Draft
    }

    /// Decide how a retry with this set's idempotency key proceeds.
    pub fn replay(&self, kind: TransactionSetKind, fingerprint: &str) -> DomainResult<Replay> {
        if self.kind != kind || self.fingerprint != fingerprint {
            return Err(DomainError::conflict(ConflictReason::IdempotencyKeyReused {
                key: self.idempotency_key.clone().unwrap_or_default(),
            }));
        }
        match (self.status, &self.result) {
            (TransactionSetStatus::Draft, _) => Ok(Replay::Redrive),
            (TransactionSetStatus::Posted, Some(result)) => Ok(Replay::Completed(result.clone())),
            (TransactionSetStatus::Posted, None) => Err(DomainError::invariant(format!(
                "posted transaction set {} has no recorded result",
                self.id
            ))),
        }
    }

    pub fn mark_posted(&mut self, result: serde_json::Value, at: DateTime<Utc>) -> DomainResult<()> {
        self.status = self.status.transition(self.id, TransactionSetStatus::Posted)?;
        self.result = Some(result);
        self.posted_at = Some(at);
        Ok(())
    }

    /// Draft for longer than `grace`.
    pub fn is_stale(&self, now: DateTime<Utc>, grace: Duration) -> bool {
        self.is_draft() && now - self.created_at > grace
    }
}

impl Entity for TransactionSet {
    type Id = TransactionSetId;
    const NAME: &'static str = "transaction_set";

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl TenantScoped for TransactionSet {
    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

/// Canonical fingerprint of a request, compared when an idempotency key is reused.
pub fn request_fingerprint<T: Serialize>(request: &T) -> DomainResult<String> {
    serde_json::to_string(request)
        .map_err(|e| DomainError::validation(format!("request cannot be fingerprinted: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn draft() -> TransactionSet {
        TransactionSet::open(
            TenantId::new(),
            TransactionSetKind::Fulfillment,
            Some("req-1".to_string()),
            "{\"q\":5}".to_string(),
            UserId::new(),
            Utc::now(),
        )
    }

    #[test]
    fn draft_set_is_redriven() {
        let set = draft();
        assert_eq!(
            set.replay(TransactionSetKind::Fulfillment, "{\"q\":5}").unwrap(),
            Replay::Redrive
        );
    }

    #[test]
    fn posted_set_returns_recorded_result() {
        let mut set = draft();
        set.mark_posted(json!({"fulfillmentId": "x"}), Utc::now()).unwrap();
        assert_eq!(
            set.replay(TransactionSetKind::Fulfillment, "{\"q\":5}").unwrap(),
            Replay::Completed(json!({"fulfillmentId": "x"}))
        );
        assert!(set.mark_posted(json!({}), Utc::now()).unwrap_err().is_conflict());
    }

    #[test]
    fn key_reuse_with_different_request_conflicts() {
        let set = draft();
        let err = set.replay(TransactionSetKind::Fulfillment, "{\"q\":6}").unwrap_err();
        assert_eq!(
            err,
            DomainError::Conflict(ConflictReason::IdempotencyKeyReused {
                key: "req-1".to_string()
            })
        );
        assert!(set.replay(TransactionSetKind::Transfer, "{\"q\":5}").is_err());
    }

    #[test]
    fn staleness_uses_grace_window() {
        let mut set = draft();
        let now = set.created_at + Duration::seconds(301);
        assert!(set.is_stale(now, Duration::seconds(300)));
        assert!(!set.is_stale(now, Duration::seconds(600)));

        set.mark_posted(json!(null), now).unwrap();
        assert!(!set.is_stale(now, Duration::seconds(300)));
    }

    #[test]
    fn fingerprint_is_stable() {
        let a = request_fingerprint(&json!({"line": "l1", "qty": "5"})).unwrap();
        let b = request_fingerprint(&json!({"line": "l1", "qty": "5"})).unwrap();
        assert_eq!(a, b);
    }
}
