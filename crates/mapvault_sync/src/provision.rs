//! Generating a replica and materializing it as a local dataset.

use crate::config::{JobConfig, ProvisionParams};
use crate::error::{SyncError, SyncResult};
use crate::job::{Job, JobKind};
use crate::protocol::{GenerateRequest, GenerateStatus};
use crate::service::FeatureService;
use mapvault_core::{LocalStore, WeakStore};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// A job that yields an open dataset.
pub type ProvisionJob = Job<LocalStore>;

/// Output paths a data source is provisioning or has opened.
#[derive(Default)]
pub(crate) struct Provisioning {
    in_flight: HashSet<PathBuf>,
    opened: HashMap<PathBuf, WeakStore>,
}

pub(crate) type PathRegistry = Arc<Mutex<Provisioning>>;

/// Holds an output path in the registry until dropped.
struct PathClaim {
    registry: PathRegistry,
    key: PathBuf,
}

impl PathClaim {
    fn acquire(registry: &PathRegistry, path: &Path) -> SyncResult<Self> {
        let key = dataset_key(path);
        if !registry.lock().in_flight.insert(key.clone()) {
            return Err(SyncError::Conflict(format!(
                "{} is already being provisioned",
                path.display()
            )));
        }
        Ok(Self {
            registry: Arc::clone(registry),
            key,
        })
    }

    /// A handle to the dataset if this source still has it open.
    fn live_store(&self) -> Option<LocalStore> {
        let mut registry = self.registry.lock();
        let store = registry.opened.get(&self.key).and_then(WeakStore::upgrade);
        if store.is_none() {
            registry.opened.remove(&self.key);
        }
        store
    }

    fn remember(&self, store: &LocalStore) {
        self.registry
            .lock()
            .opened
            .insert(self.key.clone(), store.downgrade());
    }
}

impl Drop for PathClaim {
    fn drop(&mut self) {
        self.registry.lock().in_flight.remove(&self.key);
    }
}

/// Resolves `path` so that spellings of one file share a registry entry.
fn dataset_key(path: &Path) -> PathBuf {
    if let Ok(full) = std::fs::canonicalize(path) {
        return full;
    }
    let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
        return path.to_path_buf();
    };
    let parent = if parent.as_os_str().is_empty() {
        Path::new(".")
    } else {
        parent
    };
    std::fs::canonicalize(parent)
        .map(|dir| dir.join(name))
        .unwrap_or_else(|_| path.to_path_buf())
}

pub(crate) fn provision_job(
    service: Arc<dyn FeatureService>,
    params: ProvisionParams,
    config: JobConfig,
    registry: &PathRegistry,
) -> SyncResult<ProvisionJob> {
    params.check().map_err(SyncError::InvalidParameters)?;
    if !same_service(&params.service_url, service.service_url()) {
        return Err(SyncError::InvalidParameters(format!(
            "service url {} does not match the data source's service {}",
            params.service_url,
            service.service_url()
        )));
    }
    let claim = PathClaim::acquire(registry, &params.output_path)?;
    Ok(Job::new(JobKind::Provision, async move {
        provision(service.as_ref(), params, &config, &claim).await
    }))
}

fn same_service(a: &str, b: &str) -> bool {
    a.trim_end_matches('/') == b.trim_end_matches('/')
}

/// Checks that an existing dataset is the replica `params` asks for.
fn check_replica(store: &LocalStore, params: &ProvisionParams) -> SyncResult<()> {
    let replica = store.replica()?;
    let path = params.output_path.display();
    if !same_service(&replica.service_url, &params.service_url) {
        return Err(SyncError::InvalidParameters(format!(
            "{path} is a replica of {}, not {}",
            replica.service_url, params.service_url
        )));
    }
    if replica.sync_model != params.sync_model {
        return Err(SyncError::InvalidParameters(format!(
            "{path} was generated with {:?} sync, not {:?}",
            replica.sync_model, params.sync_model
        )));
    }
    if !params.layer_ids.is_empty() {
        let mut wanted = params.layer_ids.clone();
        wanted.sort_unstable();
        wanted.dedup();
        let mut held = replica.layer_ids.clone();
        held.sort_unstable();
        if wanted != held {
            return Err(SyncError::InvalidParameters(format!(
                "{path} holds layers {held:?}, not {wanted:?}"
            )));
        }
    }
    Ok(())
}

async fn provision(
    service: &dyn FeatureService,
    params: ProvisionParams,
    config: &JobConfig,
    claim: &PathClaim,
) -> SyncResult<LocalStore> {
    let path = params.output_path.clone();
    if path.exists() {
        let store = match claim.live_store() {
            Some(store) => {
                debug!(path = %path.display(), "dataset already open, sharing it");
                store
            }
            None => {
                info!(path = %path.display(), "dataset already present, opening it");
                let target = path.clone();
                let store_config = params.store_config.clone();
                tokio::task::spawn_blocking(move || {
                    LocalStore::open_with_config(target, store_config)
                })
                .await
                .map_err(|e| SyncError::Aborted(e.to_string()))??
            }
        };
        check_replica(&store, &params)?;
        claim.remember(&store);
        return Ok(store);
    }

    let request = GenerateRequest {
        extent: params.extent,
        layer_ids: params.layer_ids,
        sync_model: params.sync_model,
    };
    let remote_job = service.submit_generate(&request).await?;
    debug!(remote_job = %remote_job, url = service.service_url(), "generation submitted");

    let generated = loop {
        match service.poll_generate(&remote_job).await? {
            GenerateStatus::Pending => tokio::time::sleep(config.poll_interval).await,
            GenerateStatus::Ready(generated) => break generated,
            GenerateStatus::Failed(message) => return Err(SyncError::Remote(message)),
        }
    };

    let tables = generated.tables.len();
    let features = generated.features.len();
    let seed = generated.into_seed();
    let store_config = params.store_config;
    let target = path.clone();
    let store = tokio::task::spawn_blocking(move || {
        LocalStore::create(&target, &seed, store_config)
    })
    .await
    .map_err(|e| SyncError::Aborted(e.to_string()))??;

    info!(path = %path.display(), tables, features, "dataset provisioned");
    claim.remember(&store);
    Ok(store)
}
