//! Messages exchanged with a feature service.

use geo::Rect;
use mapvault_core::{DatasetSeed, FeatureChange, ReplicaInfo, SyncModel, TableSchema};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Asks the service to generate a replica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// Only features intersecting this extent are included.
    pub extent: Rect<f64>,
    /// Requested layers. Empty with [`SyncModel::Geodatabase`] means all.
    pub layer_ids: Vec<u32>,
    /// How the replica will be synchronized.
    pub sync_model: SyncModel,
}

/// Handle of a generation job running on the service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteJobId(pub String);

impl fmt::Display for RemoteJobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// State of a generation job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GenerateStatus {
    /// Still running.
    Pending,
    /// Finished; the replica is ready to download.
    Ready(GeneratedReplica),
    /// Finished without a replica.
    Failed(String),
}

/// A replica produced by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedReplica {
    /// Replica identity, registered with the service.
    pub replica: ReplicaInfo,
    /// Table definitions, in layer order.
    pub tables: Vec<TableSchema>,
    /// Rows at generation time.
    pub features: Vec<FeatureChange>,
    /// Server generation the rows were taken at.
    pub server_generation: u64,
}

impl GeneratedReplica {
    /// Converts the replica into a dataset seed.
    pub fn into_seed(self) -> DatasetSeed {
        DatasetSeed::new(self.replica, self.tables)
            .with_features(self.features, self.server_generation)
    }
}

/// Local changes sent to the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadRequest {
    /// Sending replica.
    pub replica_id: Uuid,
    /// Collapsed local changes.
    pub changes: Vec<FeatureChange>,
}

/// Service answer to an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    /// Generation the upload was recorded at.
    pub server_generation: u64,
    /// Number of changes applied.
    pub accepted: usize,
}

/// Asks for changes made by others since a generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRequest {
    /// Receiving replica. Its own uploads are not sent back.
    pub replica_id: Uuid,
    /// Last generation the replica has seen.
    pub since_generation: u64,
}

/// Changes made by others.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadResponse {
    /// Current state of every feature changed since the requested generation.
    pub changes: Vec<FeatureChange>,
    /// Generation the changes are current with.
    pub server_generation: u64,
}
