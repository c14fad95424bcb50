//! Transaction-set coordination for stock and allocation operations.
//!
//! An operation that carries a transaction set runs in two transactions:
//!
//! ```text
//! short tx:  look up idempotency key → replay / re-drive / insert draft set → commit
//!   ↓
//! main tx:   re-lock set → rows + audit → set posted with result → commit
//! ```
//!
//! A set left `draft` by a crash or timeout between the two is the recovery
//! signal: the caller re-drives it by repeating the request with the same key.
//! A domain rejection in the main transaction deletes the draft set, since no
//! state change happened and the key should be free for a corrected request.

use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::instrument;

use forgeledger_core::{ConflictReason, DomainError, Entity, TenantId, TransactionSetId};
use forgeledger_inventory::{Replay, TransactionSet, TransactionSetKind, request_fingerprint};

use crate::engine::{LedgerEngine, RequestContext};
use crate::error::{EngineError, EngineResult, StoreError};
use crate::store::{RowLock, StoreTx};

/// A result that is recorded on its transaction set and replayed on retry.
pub(crate) trait Recorded: Serialize + DeserializeOwned {
    /// The same result, flagged as an idempotent replay.
    fn replayed(self) -> Self;
}

pub(crate) enum SetStart<R> {
    /// Proceed with this draft set (new or re-driven).
    Proceed(TransactionSet),
    /// The set already completed; this is its recorded result.
    Replayed(R),
}

pub(crate) enum LockedSet<R> {
    Draft(TransactionSet),
    Posted(R),
}

impl LedgerEngine {
    /// Resolve the idempotency key and make sure a draft set exists.
    #[instrument(skip(self, ctx, request), fields(tenant_id = %ctx.tenant_id, kind = kind.as_str()), err)]
    pub(crate) async fn open_set<Q, R>(
        &self,
        ctx: &RequestContext,
        kind: TransactionSetKind,
        idempotency_key: Option<&str>,
        request: &Q,
    ) -> EngineResult<SetStart<R>>
    where
        Q: Serialize + Sync,
        R: Recorded,
    {
        let fingerprint = request_fingerprint(request)?;
        let mut tx = self.begin().await?;

        if let Some(key) = idempotency_key {
            if let Some(existing) = tx
                .transaction_set_by_key(ctx.tenant_id, key, RowLock::ForUpdate)
                .await?
            {
                return match existing.replay(kind, &fingerprint)? {
                    Replay::Completed(value) => {
                        tracing::info!(set_id = %existing.id, "replaying completed transaction set");
                        Ok(SetStart::Replayed(decode_result::<R>(existing.id, value)?.replayed()))
                    }
                    Replay::Redrive => {
                        tracing::info!(set_id = %existing.id, "re-driving draft transaction set");
                        Ok(SetStart::Proceed(existing))
                    }
                };
            }
        }

        let set = TransactionSet::open(
            ctx.tenant_id,
            kind,
            idempotency_key.map(str::to_owned),
            fingerprint,
            ctx.actor_id,
            Utc::now(),
        );
        match tx.insert_transaction_set(&set).await {
            Ok(()) => {}
            Err(StoreError::Conflict(_)) => {
                // Another request with the same key won the insert.
                return Err(DomainError::conflict(ConflictReason::TransactionSetInFlight {
                    set: idempotency_key.unwrap_or_default().to_string(),
                })
                .into());
            }
            Err(e) => return Err(e.into()),
        }
        tx.commit().await?;
        Ok(SetStart::Proceed(set))
    }

    /// Re-lock the set inside the main transaction.
    ///
    /// A concurrent re-drive may have posted it since [`Self::open_set`].
    pub(crate) async fn lock_set<R: Recorded>(
        &self,
        tx: &mut dyn StoreTx,
        tenant_id: TenantId,
        set_id: TransactionSetId,
    ) -> EngineResult<LockedSet<R>> {
        let set = tx
            .transaction_set(tenant_id, set_id, RowLock::ForUpdate)
            .await?
            .ok_or_else(|| DomainError::not_found(TransactionSet::NAME, set_id))?;

        if set.is_draft() {
            return Ok(LockedSet::Draft(set));
        }
        let value = set.result.clone().ok_or_else(|| {
            DomainError::invariant(format!("posted transaction set {} has no recorded result", set.id))
        })?;
        Ok(LockedSet::Posted(decode_result::<R>(set.id, value)?.replayed()))
    }

    /// Flip the set to posted with `result` recorded, inside the main transaction.
    pub(crate) async fn post_set<R: Recorded>(
        &self,
        tx: &mut dyn StoreTx,
        mut set: TransactionSet,
        result: &R,
    ) -> EngineResult<()> {
        let value = serde_json::to_value(result)
            .map_err(|e| DomainError::invariant(format!("result of set {} is not serializable: {e}", set.id)))?;
        set.mark_posted(value, Utc::now())?;
        tx.update_transaction_set(&set).await?;
        Ok(())
    }

    /// Apply the draft-set policy to the outcome of the main transaction.
    pub(crate) async fn settle_set<R>(
        &self,
        ctx: &RequestContext,
        set_id: TransactionSetId,
        outcome: EngineResult<R>,
    ) -> EngineResult<R> {
        if let Err(EngineError::Domain(rejection)) = &outcome {
            tracing::warn!(set_id = %set_id, error = %rejection, "operation rejected; discarding draft set");
            if let Err(e) = self.discard_draft_set(ctx.tenant_id, set_id).await {
                tracing::warn!(set_id = %set_id, error = %e, "draft set could not be discarded");
            }
        }
        outcome
    }

    async fn discard_draft_set(&self, tenant_id: TenantId, set_id: TransactionSetId) -> EngineResult<()> {
        let mut tx = self.begin().await?;
        tx.delete_draft_transaction_set(tenant_id, set_id).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Draft sets older than `grace` (default: the configured grace period),
    /// across all tenants, oldest first.
    #[instrument(skip(self), err)]
    pub async fn stale_draft_sets(&self, grace: Option<Duration>) -> EngineResult<Vec<TransactionSet>> {
        let grace = grace.unwrap_or(self.config.draft_grace_period);
        let grace = chrono::Duration::from_std(grace)
            .map_err(|e| DomainError::validation(format!("grace period out of range: {e}")))?;
        let cutoff = Utc::now() - grace;

        self.bounded("stale_draft_sets", async {
            let mut tx = self.begin().await?;
            let sets = tx.draft_transaction_sets_before(cutoff).await?;
            Ok(sets)
        })
        .await
    }
}

fn decode_result<R: DeserializeOwned>(set_id: TransactionSetId, value: serde_json::Value) -> EngineResult<R> {
    serde_json::from_value(value).map_err(|e| {
        DomainError::invariant(format!("recorded result of set {set_id} is undecodable: {e}")).into()
    })
}
