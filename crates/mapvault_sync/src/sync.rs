//! Exchanging changes between a dataset and its feature service.

use crate::config::{SyncDirection, SyncParams};
use crate::error::{SyncError, SyncResult};
use crate::job::{Job, JobKind};
use crate::protocol::{DownloadRequest, UploadRequest};
use crate::service::FeatureService;
use chrono::{DateTime, Utc};
use mapvault_core::{LocalStore, SyncLease};
use std::sync::Arc;
use tracing::{debug, info};

/// A job that yields a [`SyncReport`].
pub type SyncJob = Job<SyncReport>;

/// Outcome of a successful sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Direction the sync ran in.
    pub direction: SyncDirection,
    /// Local changes accepted by the service.
    pub uploaded: usize,
    /// Remote changes applied to the dataset.
    pub downloaded: usize,
    /// Server generation the dataset is now current with.
    pub server_generation: u64,
    /// When the sync finished.
    pub completed_at: DateTime<Utc>,
}

pub(crate) fn sync_job(
    service: Arc<dyn FeatureService>,
    store: &LocalStore,
    params: SyncParams,
) -> SyncResult<SyncJob> {
    let lease = store.begin_sync().map_err(SyncError::from_lease)?;
    let store = store.clone();
    Ok(Job::new(JobKind::Sync, async move {
        synchronize(service.as_ref(), &store, lease, params.direction).await
    }))
}

async fn synchronize(
    service: &dyn FeatureService,
    store: &LocalStore,
    lease: SyncLease,
    direction: SyncDirection,
) -> SyncResult<SyncReport> {
    let replica_id = store.replica()?.replica_id;
    let since = store.last_sync()?.map_or(0, |point| point.server_generation);

    let mut uploaded = 0;
    if direction.uploads() {
        let changes = store.pending_changes()?;
        if !changes.is_empty() {
            let response = service
                .upload(&UploadRequest {
                    replica_id,
                    changes,
                })
                .await?;
            uploaded = response.accepted;
            debug!(uploaded, generation = response.server_generation, "local changes uploaded");
        }
    }

    let mut generation = since;
    let mut remote = Vec::new();
    if direction.downloads() {
        let response = service
            .download(&DownloadRequest {
                replica_id,
                since_generation: since,
            })
            .await?;
        generation = generation.max(response.server_generation);
        remote = response.changes;
    }

    let downloaded = store.apply_sync(&lease, &remote, generation, direction.uploads())?;
    drop(lease);

    info!(uploaded, downloaded, generation, "dataset synchronized");
    Ok(SyncReport {
        direction,
        uploaded,
        downloaded,
        server_generation: generation,
        completed_at: Utc::now(),
    })
}
