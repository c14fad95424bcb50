//! Infrastructure layer: storage backends, configuration and the engine
//! services that tie the pure domain crates to a transactional store.
//!
//! Every state-changing operation follows the same shape:
//!
//! ```text
//! begin transaction
//!   ↓
//! lock rows (payment, documents sorted by id, balance rows)
//!   ↓
//! domain checks on the locked figures
//!   ↓
//! row writes + audit row
//!   ↓
//! commit, then publish the audit record to the sink
//! ```
//!
//! Any error before commit drops the transaction, which rolls it back.

pub mod audit;
pub mod config;
pub mod engine;
pub mod error;
pub mod store;

mod allocation;
mod fulfillment;
mod posting;
mod transaction_set;

pub use allocation::{
    AllocateRequest, AllocateResult, AllocationSelector, DocumentAllocationSummary,
    PaymentSummary, UnallocateRequest, UnallocateResult,
};
pub use audit::AuditEmitter;
pub use config::{ConfigError, EngineConfig};
pub use engine::{LedgerEngine, RequestContext};
pub use error::{EngineError, EngineResult, StoreError};
pub use fulfillment::{
    BalanceSnapshot, FulfillRequest, FulfillResult, LineProgressView, ReceiveStockRequest,
    ReceiveStockResult, TransferRequest, TransferResult,
};
pub use posting::{ManualJournalEntry, PostResult, VoidResult};
pub use store::{EngineStore, InMemoryEngineStore, PostgresEngineStore, RowLock, StoreTx};
