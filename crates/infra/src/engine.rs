//! The ledger and allocation consistency engine.
//!
//! [`LedgerEngine`] is the single entry point for state-changing operations.
//! The operations themselves live next to their request and result types:
//!
//! - posting and voiding: `posting.rs`
//! - payment allocation: `allocation.rs`
//! - stock movements and fulfillment: `fulfillment.rs`
//! - transaction-set bookkeeping shared by the stock operations: `transaction_set.rs`
//!
//! Every operation is bounded by `EngineConfig::operation_timeout`. When the
//! deadline fires the operation future is dropped, which drops its open
//! transaction and rolls it back.

use std::future::Future;
use std::sync::Arc;

use forgeledger_core::{TenantId, UserId};
use forgeledger_events::{ActionRegistry, AuditRecord, AuditSink};

use crate::audit::AuditEmitter;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::store::{EngineStore, StoreTx};

/// Caller identity, already resolved by the request layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestContext {
    pub tenant_id: TenantId,
    pub actor_id: UserId,
}

impl RequestContext {
    pub fn new(tenant_id: TenantId, actor_id: UserId) -> Self {
        Self { tenant_id, actor_id }
    }
}

#[derive(Clone)]
pub struct LedgerEngine {
    pub(crate) store: Arc<dyn EngineStore>,
    pub(crate) audit: AuditEmitter,
    pub(crate) config: EngineConfig,
}

impl LedgerEngine {
    pub fn new(
        store: Arc<dyn EngineStore>,
        registry: Arc<ActionRegistry>,
        sink: Arc<dyn AuditSink>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            audit: AuditEmitter::new(registry, sink),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) async fn begin(&self) -> EngineResult<Box<dyn StoreTx>> {
        Ok(self.store.begin().await?)
    }

    /// Run `fut` under the operation deadline.
    pub(crate) async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> EngineResult<T>
    where
        F: Future<Output = EngineResult<T>>,
    {
        let after = self.config.operation_timeout;
        match tokio::time::timeout(after, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(operation, timeout_ms = after.as_millis() as u64, "operation timed out");
                Err(EngineError::Timeout { operation, after })
            }
        }
    }

    /// Commit `tx`, then hand the staged audit records to the sink.
    pub(crate) async fn commit(
        &self,
        tx: Box<dyn StoreTx>,
        records: impl IntoIterator<Item = AuditRecord>,
    ) -> EngineResult<()> {
        tx.commit().await?;
        for record in records {
            self.audit.publish(&record);
        }
        Ok(())
    }
}

impl core::fmt::Debug for LedgerEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LedgerEngine")
            .field("audit", &self.audit)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
