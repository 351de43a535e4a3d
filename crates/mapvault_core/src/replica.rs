//! Replica metadata recorded in the dataset header.

use crate::feature::FeatureChange;
use crate::schema::TableSchema;
use chrono::{DateTime, Utc};
use geo::Rect;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How the remote source tracks the replica's changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncModel {
    /// Each layer is synchronized on its own.
    Layer,
    /// The whole dataset is synchronized as one unit.
    Geodatabase,
}

/// Identity of a local dataset as a replica of a remote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicaInfo {
    /// Replica id registered with the remote service.
    pub replica_id: Uuid,
    /// URL of the remote feature service.
    pub service_url: String,
    /// Sync model requested at generation.
    pub sync_model: SyncModel,
    /// Spatial filter the replica was generated with.
    pub extent: Rect<f64>,
    /// Layer ids included in the replica.
    pub layer_ids: Vec<u32>,
    /// When the dataset was generated.
    pub created_at: DateTime<Utc>,
}

impl ReplicaInfo {
    /// Creates replica metadata stamped with the current time.
    pub fn new(
        replica_id: Uuid,
        service_url: impl Into<String>,
        sync_model: SyncModel,
        extent: Rect<f64>,
        layer_ids: Vec<u32>,
    ) -> Self {
        Self {
            replica_id,
            service_url: service_url.into(),
            sync_model,
            extent,
            layer_ids,
            created_at: Utc::now(),
        }
    }
}

/// The last successful synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPoint {
    /// Server generation the dataset is current with.
    pub server_generation: u64,
    /// When the sync was applied.
    pub synced_at: DateTime<Utc>,
}

/// Everything needed to materialize a new dataset.
#[derive(Debug, Clone)]
pub struct DatasetSeed {
    /// Replica identity.
    pub replica: ReplicaInfo,
    /// Tables, in definition order.
    pub tables: Vec<TableSchema>,
    /// Initial rows. Only inserts are meaningful here.
    pub features: Vec<FeatureChange>,
    /// Server generation the initial rows were taken at.
    pub server_generation: u64,
}

impl DatasetSeed {
    /// Creates a seed with tables and no rows.
    #[must_use]
    pub fn new(replica: ReplicaInfo, tables: Vec<TableSchema>) -> Self {
        Self {
            replica,
            tables,
            features: Vec::new(),
            server_generation: 0,
        }
    }

    /// Adds initial rows taken at `server_generation`.
    #[must_use]
    pub fn with_features(mut self, features: Vec<FeatureChange>, server_generation: u64) -> Self {
        self.features = features;
        self.server_generation = server_generation;
        self
    }
}
