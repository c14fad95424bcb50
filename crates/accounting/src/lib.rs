//! Accounting module (double-entry journal).
//!
//! Pure domain logic only: no IO, no persistence concerns. Entries are
//! validated once when built and never mutated afterwards; corrections are
//! new reversing entries.

pub mod account;
pub mod journal;
pub mod posting;

pub use account::{Account, AccountKind, NormalBalance};
pub use journal::{JournalEntry, JournalLine, LineDraft, NewJournalEntry, SourceKind, SourceRef};
pub use posting::{PostingAccounts, PostingSource, posting_lines};
