//! Audit emission for engine operations.
//!
//! The audit row is written inside the operation's transaction, so it commits
//! or rolls back together with the state change it describes. The sink only
//! sees a record after the transaction committed.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use forgeledger_events::{ActionRegistry, AuditAction, AuditRecord, AuditSink};

use crate::engine::RequestContext;
use crate::error::{EngineError, EngineResult};
use crate::store::StoreTx;

#[derive(Clone)]
pub struct AuditEmitter {
    registry: Arc<ActionRegistry>,
    sink: Arc<dyn AuditSink>,
}

impl AuditEmitter {
    pub fn new(registry: Arc<ActionRegistry>, sink: Arc<dyn AuditSink>) -> Self {
        Self { registry, sink }
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    /// Validate and stage an audit row in `tx`.
    pub async fn record(
        &self,
        tx: &mut dyn StoreTx,
        ctx: &RequestContext,
        action: AuditAction,
        entity_id: impl Into<Uuid>,
        metadata: serde_json::Value,
    ) -> EngineResult<AuditRecord> {
        self.registry
            .validate(action, &metadata)
            .map_err(|e| EngineError::Audit(e.to_string()))?;

        let record = AuditRecord::new(
            ctx.tenant_id,
            ctx.actor_id,
            action,
            entity_id,
            metadata,
            Utc::now(),
        );
        tx.insert_audit(&record).await?;
        Ok(record)
    }

    /// Hand a committed record to the sink.
    ///
    /// The record is already durable, so a sink failure is logged and the
    /// operation still succeeds.
    pub fn publish(&self, record: &AuditRecord) {
        if let Err(e) = self.sink.publish(record) {
            tracing::warn!(
                audit_id = %record.id(),
                action = %record.action(),
                error = %e,
                "audit sink rejected committed record"
            );
        }
    }
}

impl core::fmt::Debug for AuditEmitter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AuditEmitter")
            .field("actions", &self.registry.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forgeledger_core::{TenantId, UserId};
    use forgeledger_events::{AuditSinkError, InMemoryAuditSink};
    use serde_json::json;

    use crate::store::{EngineStore, InMemoryEngineStore};

    struct FailingSink;

    impl AuditSink for FailingSink {
        fn publish(&self, _record: &AuditRecord) -> Result<(), AuditSinkError> {
            Err(AuditSinkError::Unavailable("down".into()))
        }
    }

    fn ctx() -> RequestContext {
        RequestContext::new(TenantId::new(), UserId::new())
    }

    #[tokio::test]
    async fn missing_metadata_key_is_rejected_before_write() {
        let store = InMemoryEngineStore::new();
        let emitter = AuditEmitter::new(
            Arc::new(ActionRegistry::standard()),
            Arc::new(InMemoryAuditSink::new()),
        );
        let ctx = ctx();

        let mut tx = store.begin().await.unwrap();
        let err = emitter
            .record(tx.as_mut(), &ctx, AuditAction::PaymentPost, Uuid::now_v7(), json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Audit(_)));
        tx.commit().await.unwrap();

        assert!(store.audit_records(ctx.tenant_id).await.is_empty());
    }

    #[tokio::test]
    async fn unregistered_action_is_rejected() {
        let store = InMemoryEngineStore::new();
        let emitter = AuditEmitter::new(
            Arc::new(ActionRegistry::builder().register(AuditAction::PaymentPost).build()),
            Arc::new(InMemoryAuditSink::new()),
        );

        let mut tx = store.begin().await.unwrap();
        let err = emitter
            .record(
                tx.as_mut(),
                &ctx(),
                AuditAction::PaymentVoid,
                Uuid::now_v7(),
                json!({ "previousStatus": "draft" }),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not registered"));
    }

    #[tokio::test]
    async fn sink_failure_does_not_panic() {
        let store = InMemoryEngineStore::new();
        let emitter = AuditEmitter::new(Arc::new(ActionRegistry::standard()), Arc::new(FailingSink));
        let ctx = ctx();

        let mut tx = store.begin().await.unwrap();
        let record = emitter
            .record(
                tx.as_mut(),
                &ctx,
                AuditAction::PaymentPost,
                Uuid::now_v7(),
                json!({ "journalEntryId": Uuid::now_v7() }),
            )
            .await
            .unwrap();
        tx.commit().await.unwrap();
        emitter.publish(&record);

        assert_eq!(store.audit_records(ctx.tenant_id).await, vec![record]);
    }
}
