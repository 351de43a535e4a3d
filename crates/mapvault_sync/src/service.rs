//! Feature service abstraction.

use crate::error::SyncResult;
use crate::protocol::{
    DownloadRequest, DownloadResponse, GenerateRequest, GenerateStatus, RemoteJobId,
    UploadRequest, UploadResponse,
};
use async_trait::async_trait;

/// A remote feature service that replicas are generated from and synced with.
///
/// This trait abstracts the transport, allowing for different implementations
/// (HTTP, in-memory for tests and demos, etc.).
#[async_trait]
pub trait FeatureService: Send + Sync + 'static {
    /// Base URL of the service.
    fn service_url(&self) -> &str;

    /// Starts generating a replica.
    async fn submit_generate(&self, request: &GenerateRequest) -> SyncResult<RemoteJobId>;

    /// Checks on a generation job.
    async fn poll_generate(&self, job: &RemoteJobId) -> SyncResult<GenerateStatus>;

    /// Sends local changes.
    async fn upload(&self, request: &UploadRequest) -> SyncResult<UploadResponse>;

    /// Fetches changes made by others.
    async fn download(&self, request: &DownloadRequest) -> SyncResult<DownloadResponse>;
}
