//! Transactions over a dataset.
//!
//! ## Invariants
//!
//! - at most one transaction is active per dataset
//! - commit writes `Begin`, the row records and `Commit` in one append and
//!   makes them durable before the index changes
//! - rollback discards the buffered edits and writes nothing
//! - no transaction may begin while a synchronization holds the lease

mod manager;
mod state;

pub use manager::{SyncLease, TransactionManager};
pub(crate) use state::PendingWrite;
