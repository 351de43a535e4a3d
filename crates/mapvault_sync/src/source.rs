//! Entry point for remote work on datasets.

use crate::config::{JobConfig, ProvisionParams, SyncParams};
use crate::error::SyncResult;
use crate::provision::{provision_job, PathRegistry, ProvisionJob};
use crate::service::FeatureService;
use crate::sync::{sync_job, SyncJob};
use mapvault_core::LocalStore;
use std::sync::Arc;

/// Creates provisioning and sync jobs against one feature service.
///
/// Only one provisioning job per output path may be in flight at a time, and
/// only one sync job per dataset. Datasets the source provisions are tracked
/// without being kept open, so provisioning an open path again shares it.
#[derive(Clone)]
pub struct RemoteDataSource {
    service: Arc<dyn FeatureService>,
    config: JobConfig,
    provisioning: PathRegistry,
}

impl RemoteDataSource {
    /// Creates a data source with the default job configuration.
    pub fn new(service: Arc<dyn FeatureService>) -> Self {
        Self::with_config(service, JobConfig::default())
    }

    /// Creates a data source.
    pub fn with_config(service: Arc<dyn FeatureService>, config: JobConfig) -> Self {
        Self {
            service,
            config,
            provisioning: PathRegistry::default(),
        }
    }

    /// The underlying service.
    pub fn service(&self) -> &Arc<dyn FeatureService> {
        &self.service
    }

    /// Creates a job that generates a replica and opens it as a dataset.
    ///
    /// If a dataset already exists at the output path, the job returns it
    /// without contacting the service: a handle to the open dataset when
    /// this source already has it open, otherwise a freshly opened one.
    /// The existing dataset must be a replica of the same service, sync
    /// model and (when given) layers.
    ///
    /// # Errors
    ///
    /// - [`crate::SyncError::InvalidParameters`] for inconsistent parameters,
    ///   a service url other than this source's, or an existing dataset
    ///   that is a different replica (the last reported by the job)
    /// - [`crate::SyncError::Conflict`] if the output path is already being
    ///   provisioned
    pub fn create_provision_job(&self, params: ProvisionParams) -> SyncResult<ProvisionJob> {
        provision_job(
            Arc::clone(&self.service),
            params,
            self.config.clone(),
            &self.provisioning,
        )
    }

    /// Creates a job that uploads local changes, downloads remote ones and
    /// applies them.
    ///
    /// The dataset is held for the sync from this call until the job ends
    /// or is dropped: `begin()` and edits fail with a conflict meanwhile.
    ///
    /// # Errors
    ///
    /// - [`mapvault_core::CoreError::Policy`] (wrapped in
    ///   [`crate::SyncError::Store`]) while a transaction is active
    /// - [`crate::SyncError::Conflict`] if a sync job already holds the dataset
    pub fn create_sync_job(&self, store: &LocalStore, params: SyncParams) -> SyncResult<SyncJob> {
        sync_job(Arc::clone(&self.service), store, params)
    }
}

impl std::fmt::Debug for RemoteDataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteDataSource")
            .field("service_url", &self.service.service_url())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
