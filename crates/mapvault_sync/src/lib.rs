//! # MapVault Sync
//!
//! Provisioning and synchronization of MapVault datasets.
//!
//! This crate provides:
//! - The [`FeatureService`] abstraction over a remote feature service
//! - [`RemoteDataSource`], which creates provisioning and sync jobs
//! - [`Job`], a background task with an observable
//!   `Queued → Running → (Succeeded | Failed)` status
//! - [`InMemoryFeatureService`] for tests, demos and offline development
//!
//! ## Architecture
//!
//! A provisioning job asks the service to generate a replica, polls until it
//! is ready, and writes it to a new dataset file. A sync job uploads the
//! dataset's pending local changes, downloads what others changed since the
//! last sync, and applies those changes to the dataset in one atomic batch.
//!
//! ## Key Invariants
//!
//! - The server is authoritative for features edited on both sides
//! - A failed sync leaves the dataset as it was
//! - A sync never starts while a transaction is active
//! - Failures surface through the job; nothing is retried automatically

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod job;
mod memory;
mod protocol;
mod provision;
mod service;
mod source;
mod sync;

pub use config::{JobConfig, ProvisionParams, SyncDirection, SyncParams};
pub use error::{SyncError, SyncResult};
pub use job::{Job, JobEvent, JobId, JobKind, JobStatus};
pub use memory::{CallCounts, Fault, InMemoryFeatureService, ServiceCall};
pub use protocol::{
    DownloadRequest, DownloadResponse, GenerateRequest, GenerateStatus, GeneratedReplica,
    RemoteJobId, UploadRequest, UploadResponse,
};
pub use provision::ProvisionJob;
pub use service::FeatureService;
pub use source::RemoteDataSource;
pub use sync::{SyncJob, SyncReport};
