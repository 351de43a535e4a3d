//! Configuration and parameters for provisioning and sync jobs.

use geo::Rect;
use mapvault_core::{StoreConfig, SyncModel};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings shared by all jobs of a [`crate::RemoteDataSource`].
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Delay between polls of a remote generation job.
    pub poll_interval: Duration,
}

impl JobConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the delay between polls of a remote generation job.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
        }
    }
}

/// Inputs of a provisioning job.
#[derive(Debug, Clone)]
pub struct ProvisionParams {
    /// Feature service to generate the replica from.
    pub service_url: String,
    /// Only features intersecting this extent are included.
    pub extent: Rect<f64>,
    /// Where the dataset file is written.
    pub output_path: PathBuf,
    /// Layers to include. Empty with [`SyncModel::Geodatabase`] means all.
    pub layer_ids: Vec<u32>,
    /// How the replica is synchronized.
    pub sync_model: SyncModel,
    /// Configuration used to open the resulting dataset.
    pub store_config: StoreConfig,
}

impl ProvisionParams {
    /// Creates parameters for a whole-service replica.
    pub fn new(
        service_url: impl Into<String>,
        extent: Rect<f64>,
        output_path: impl AsRef<Path>,
    ) -> Self {
        Self {
            service_url: service_url.into(),
            extent,
            output_path: output_path.as_ref().to_path_buf(),
            layer_ids: Vec::new(),
            sync_model: SyncModel::Geodatabase,
            store_config: StoreConfig::default(),
        }
    }

    /// Sets the layers to include.
    pub fn with_layers(mut self, layer_ids: impl IntoIterator<Item = u32>) -> Self {
        self.layer_ids = layer_ids.into_iter().collect();
        self
    }

    /// Sets the sync model.
    pub fn with_sync_model(mut self, sync_model: SyncModel) -> Self {
        self.sync_model = sync_model;
        self
    }

    /// Sets the configuration used to open the dataset.
    pub fn with_store_config(mut self, config: StoreConfig) -> Self {
        self.store_config = config;
        self
    }

    /// Checks the parameters that do not need the remote service.
    pub(crate) fn check(&self) -> Result<(), String> {
        if self.sync_model == SyncModel::Layer && self.layer_ids.is_empty() {
            return Err("per-layer sync needs at least one layer id".into());
        }
        if self.output_path.as_os_str().is_empty() {
            return Err("output path is empty".into());
        }
        Ok(())
    }
}

/// Which way changes travel during a sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncDirection {
    /// Upload local changes, then download remote ones.
    #[default]
    Bidirectional,
    /// Upload local changes only.
    Upload,
    /// Download remote changes only.
    Download,
}

impl SyncDirection {
    /// Returns true if local changes are uploaded.
    pub fn uploads(self) -> bool {
        matches!(self, Self::Bidirectional | Self::Upload)
    }

    /// Returns true if remote changes are downloaded.
    pub fn downloads(self) -> bool {
        matches!(self, Self::Bidirectional | Self::Download)
    }
}

/// Inputs of a sync job.
#[derive(Debug, Clone, Default)]
pub struct SyncParams {
    /// Which way changes travel.
    pub direction: SyncDirection,
}

impl SyncParams {
    /// Creates bidirectional sync parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the sync direction.
    pub fn with_direction(mut self, direction: SyncDirection) -> Self {
        self.direction = direction;
        self
    }
}
