//! # MapVault Core
//!
//! Local transactional edit store for offline map datasets.
//!
//! This crate provides:
//! - Dataset files: one append-only, checksummed log per dataset
//! - Tables with typed attribute schemas and point, line or polygon geometry
//! - Transactions with read-your-writes and atomic, durable commit
//! - Feature editing, including edits that wait for a sketched geometry
//! - A local change set for upload and atomic application of remote changes
//!
//! ## Architecture
//!
//! A [`LocalStore`] owns one dataset file under an exclusive lock. Opening it
//! replays the log into an in-memory index; rows are read back from the file
//! on demand. All edits flow through the store's [`TransactionManager`],
//! which buffers them until commit and then appends the whole batch at once.
//!
//! ## Key Invariants
//!
//! - At most one transaction is active per dataset
//! - A commit is all or nothing, also across a crash
//! - Rollback leaves the dataset exactly as it was at `begin`
//! - No local transaction runs while a synchronization holds the dataset
//! - Rows from the remote source replace local rows with the same global id

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod events;
mod feature;
mod geometry;
mod index;
mod log;
mod mutator;
mod recovery;
mod replica;
mod schema;
mod store;
mod transaction;
mod types;

pub use config::StoreConfig;
pub use error::{CoreError, CoreResult};
pub use events::{EventFeed, StoreEvent};
pub use feature::{ChangeOp, Feature, FeatureChange, FeatureData, Table};
pub use geometry::{Geometry, GeometryType};
pub use log::{
    compute_crc32, DatasetLog, LogIterator, LogRecord, LogRecordType, Origin, RecordLocation,
    LOG_MAGIC, LOG_VERSION, MAX_PAYLOAD_SIZE,
};
pub use mutator::{FeatureMutator, GeometryRequest, GeometrySender};
pub use replica::{DatasetSeed, ReplicaInfo, SyncModel, SyncPoint};
pub use schema::{AttributeValue, FieldDef, FieldType, TableSchema};
pub use store::{LocalStore, WeakStore};
pub use transaction::{SyncLease, TransactionManager};
pub use types::{FeatureId, GlobalId, SequenceNumber, TableId, TransactionId};
