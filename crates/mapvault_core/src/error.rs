//! Error types for MapVault core.

use crate::types::{FeatureId, GlobalId};
use mapvault_storage::StorageError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in MapVault core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(StorageError),

    /// I/O error outside the storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The dataset file is damaged or not a dataset.
    #[error("dataset corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// Another handle holds the dataset open.
    #[error("dataset locked by another handle: {}", .0.display())]
    Locked(PathBuf),

    /// No dataset exists at the path.
    #[error("dataset not found: {}", .0.display())]
    NotFound(PathBuf),

    /// A dataset already exists where a new one was to be created.
    #[error("dataset already exists: {}", .0.display())]
    AlreadyExists(PathBuf),

    /// Checksum mismatch in a log record.
    #[error("checksum mismatch at offset {offset}: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Offset of the damaged record.
        offset: u64,
        /// Stored checksum.
        expected: u32,
        /// Computed checksum.
        actual: u32,
    },

    /// A geometry is missing, degenerate or outside the table's domain.
    #[error("validation failed: {message}")]
    Validation {
        /// What was rejected.
        message: String,
    },

    /// An attribute or table does not match the dataset schema.
    #[error("schema error: {message}")]
    Schema {
        /// What did not match.
        message: String,
    },

    /// The transaction policy forbids the operation.
    #[error("policy violation: {message}")]
    Policy {
        /// Why the operation was refused.
        message: String,
    },

    /// The operation collides with work already in flight.
    #[error("conflict: {message}")]
    Conflict {
        /// What is in flight.
        message: String,
    },

    /// The operation was cancelled before anything was written.
    #[error("operation cancelled")]
    Cancelled,

    /// No such feature in the table.
    #[error("feature {id} not found in table {table}")]
    FeatureNotFound {
        /// Table name.
        table: String,
        /// Local feature id.
        id: FeatureId,
    },

    /// A global id is already used by another feature.
    #[error("global id {0} is already in use")]
    DuplicateGlobalId(GlobalId),

    /// Row encoding or decoding failed.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the failure.
        message: String,
    },

    /// The store has been closed.
    #[error("dataset is closed")]
    Closed,
}

impl CoreError {
    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }

    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a schema error.
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    /// Creates a policy error.
    pub fn policy(message: impl Into<String>) -> Self {
        Self::Policy {
            message: message.into(),
        }
    }

    /// Creates a conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Returns true for errors that mean the dataset file cannot be used.
    #[must_use]
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            Self::Storage(_)
                | Self::Io(_)
                | Self::Corrupted { .. }
                | Self::ChecksumMismatch { .. }
                | Self::Locked(_)
                | Self::NotFound(_)
        )
    }
}

impl From<StorageError> for CoreError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(path) => Self::NotFound(path),
            StorageError::Locked(path) => Self::Locked(path),
            other => Self::Storage(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_map_to_dataset_errors() {
        let path = PathBuf::from("bay.mvds");
        assert!(matches!(
            CoreError::from(StorageError::NotFound(path.clone())),
            CoreError::NotFound(p) if p == path
        ));
        assert!(matches!(
            CoreError::from(StorageError::Locked(path.clone())),
            CoreError::Locked(_)
        ));
        let read = StorageError::ReadPastEnd {
            offset: 4,
            len: 4,
            size: 6,
        };
        assert!(matches!(CoreError::from(read), CoreError::Storage(_)));
    }

    #[test]
    fn storage_classification() {
        assert!(CoreError::corrupted("bad magic").is_storage());
        assert!(!CoreError::policy("no transaction").is_storage());
        assert!(!CoreError::Cancelled.is_storage());
    }
}
