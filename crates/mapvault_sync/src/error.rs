//! Error types for provisioning and synchronization.

use mapvault_core::CoreError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while provisioning or synchronizing a dataset.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The local dataset rejected an operation.
    #[error("store error: {0}")]
    Store(#[from] CoreError),

    /// The remote service reported a failure.
    #[error("remote error: {0}")]
    Remote(String),

    /// The remote service could not be reached.
    #[error("remote service unreachable: {0}")]
    Unreachable(String),

    /// The remote service did not answer in time.
    #[error("remote operation timed out")]
    Timeout,

    /// Another job already holds the dataset or output path.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Job parameters are inconsistent.
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// The remote service answered with something unexpected.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The task running a job ended without producing a result.
    #[error("job aborted: {0}")]
    Aborted(String),
}

impl SyncError {
    /// Creates a remote error.
    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote(message.into())
    }

    /// Creates an invalid-parameters error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidParameters(message.into())
    }

    /// Returns true if the error came from the remote side.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            SyncError::Remote(_) | SyncError::Unreachable(_) | SyncError::Timeout
        )
    }

    /// Lifts a store error, keeping conflicts in the sync taxonomy.
    pub(crate) fn from_lease(error: CoreError) -> Self {
        match error {
            CoreError::Conflict { message } => Self::Conflict(message),
            other => Self::Store(other),
        }
    }
}
