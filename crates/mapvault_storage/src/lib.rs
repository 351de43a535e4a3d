//! # MapVault Storage
//!
//! Byte-level storage for MapVault dataset files.
//!
//! A dataset is a single append-only file. This crate knows nothing about
//! what is inside it: backends read, append, flush and truncate raw bytes.
//! Record framing, recovery and transactions belong to `mapvault_core`.
//!
//! ## Available Backends
//!
//! - [`FileBackend`] - a dataset file on disk, optionally held under an
//!   exclusive advisory lock
//! - [`InMemoryBackend`] - shared in-memory bytes for tests and scratch datasets
//!
//! ## Example
//!
//! ```rust
//! use mapvault_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"feature bytes").unwrap();
//! assert_eq!(backend.read_at(offset, 7).unwrap(), b"feature");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
