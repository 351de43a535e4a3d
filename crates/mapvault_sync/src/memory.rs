//! An in-process feature service for tests, demos and offline development.

use crate::error::{SyncError, SyncResult};
use crate::protocol::{
    DownloadRequest, DownloadResponse, GenerateRequest, GenerateStatus, GeneratedReplica,
    RemoteJobId, UploadRequest, UploadResponse,
};
use crate::service::FeatureService;
use async_trait::async_trait;
use geo::Rect;
use mapvault_core::{
    ChangeOp, FeatureChange, FeatureData, GlobalId, ReplicaInfo, SyncModel, TableSchema,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;
use uuid::Uuid;

/// A service call that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceCall {
    /// [`FeatureService::submit_generate`]
    Generate,
    /// [`FeatureService::poll_generate`]
    Poll,
    /// [`FeatureService::upload`]
    Upload,
    /// [`FeatureService::download`]
    Download,
}

/// How an injected failure presents itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// The service cannot be reached.
    Unreachable,
    /// The call times out.
    Timeout,
    /// The service answers with an error.
    Remote(String),
}

impl Fault {
    fn into_error(self) -> SyncError {
        match self {
            Fault::Unreachable => SyncError::Unreachable("connection refused".into()),
            Fault::Timeout => SyncError::Timeout,
            Fault::Remote(message) => SyncError::Remote(message),
        }
    }
}

/// Number of calls the service has received.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    /// Generation requests.
    pub generate: usize,
    /// Generation polls.
    pub poll: usize,
    /// Uploads.
    pub upload: usize,
    /// Downloads.
    pub download: usize,
}

#[derive(Debug, Clone)]
struct StoredFeature {
    layer: String,
    data: FeatureData,
}

#[derive(Debug)]
struct Revision {
    generation: u64,
    origin: Option<Uuid>,
    global_id: GlobalId,
    layer: String,
}

#[derive(Debug)]
struct PendingGeneration {
    polls_left: u32,
    replica: GeneratedReplica,
}

#[derive(Debug, Default)]
struct ServiceState {
    layers: BTreeMap<u32, TableSchema>,
    features: BTreeMap<GlobalId, StoredFeature>,
    revisions: Vec<Revision>,
    generation: u64,
    replicas: HashMap<Uuid, Vec<String>>,
    jobs: HashMap<RemoteJobId, PendingGeneration>,
    next_job: u64,
    polls_per_job: u32,
    faults: HashMap<ServiceCall, Fault>,
    calls: CallCounts,
}

impl ServiceState {
    fn take_fault(&mut self, call: ServiceCall) -> SyncResult<()> {
        match self.faults.remove(&call) {
            Some(fault) => Err(fault.into_error()),
            None => Ok(()),
        }
    }

    fn layer_names(&self, layer_ids: &[u32]) -> Vec<String> {
        layer_ids
            .iter()
            .filter_map(|id| self.layers.get(id))
            .map(|schema| schema.name.clone())
            .collect()
    }

    fn layer_by_name(&self, name: &str) -> Option<&TableSchema> {
        self.layers.values().find(|schema| schema.name == name)
    }

    fn record(&mut self, origin: Option<Uuid>, change: FeatureChange) {
        match change.op {
            ChangeOp::Insert(data) | ChangeOp::Update(data) => {
                self.features.insert(
                    change.global_id,
                    StoredFeature {
                        layer: change.table.clone(),
                        data,
                    },
                );
            }
            ChangeOp::Delete => {
                self.features.remove(&change.global_id);
            }
        }
        self.revisions.push(Revision {
            generation: self.generation,
            origin,
            global_id: change.global_id,
            layer: change.table,
        });
    }
}

/// A feature service held entirely in memory.
///
/// Layers and features are seeded with [`InMemoryFeatureService::with_layer`]
/// and [`InMemoryFeatureService::publish`]. Every upload or publish advances
/// the server generation; downloads return the current state of features
/// changed by anyone other than the requesting replica.
///
/// # Example
///
/// ```rust
/// use geo::{coord, Rect};
/// use mapvault_core::{GeometryType, TableSchema};
/// use mapvault_sync::InMemoryFeatureService;
///
/// let extent = Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 10.0, y: 10.0 });
/// let service = InMemoryFeatureService::new("memory://parks")
///     .with_layer(TableSchema::new(0, "Trees", GeometryType::Point, extent));
/// assert_eq!(service.generation(), 0);
/// ```
#[derive(Debug)]
pub struct InMemoryFeatureService {
    url: String,
    state: Mutex<ServiceState>,
}

impl InMemoryFeatureService {
    /// Creates an empty service.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            state: Mutex::new(ServiceState::default()),
        }
    }

    /// Adds a layer, keyed by its schema's layer id.
    pub fn with_layer(self, schema: TableSchema) -> Self {
        self.state.lock().layers.insert(schema.layer_id, schema);
        self
    }

    /// Makes generation jobs report pending for `polls` polls before
    /// completing.
    pub fn with_generation_polls(self, polls: u32) -> Self {
        self.state.lock().polls_per_job = polls;
        self
    }

    /// Applies a change made directly on the server.
    ///
    /// Returns the new server generation.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidParameters`] if the layer does not exist.
    pub fn publish(&self, change: FeatureChange) -> SyncResult<u64> {
        let mut state = self.state.lock();
        if state.layer_by_name(&change.table).is_none() {
            return Err(SyncError::invalid(format!("no layer {:?}", change.table)));
        }
        state.generation += 1;
        state.record(None, change);
        Ok(state.generation)
    }

    /// Makes the next call of the given kind fail.
    pub fn fail_next(&self, call: ServiceCall, fault: Fault) {
        self.state.lock().faults.insert(call, fault);
    }

    /// Calls received so far.
    pub fn calls(&self) -> CallCounts {
        self.state.lock().calls
    }

    /// Current server generation.
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Current data of a feature.
    pub fn feature(&self, global_id: GlobalId) -> Option<FeatureData> {
        self.state
            .lock()
            .features
            .get(&global_id)
            .map(|stored| stored.data.clone())
    }

    /// Number of features in a layer.
    pub fn feature_count(&self, layer: &str) -> usize {
        self.state
            .lock()
            .features
            .values()
            .filter(|stored| stored.layer == layer)
            .count()
    }

    /// Number of replicas generated from this service.
    pub fn replica_count(&self) -> usize {
        self.state.lock().replicas.len()
    }

    fn resolve_layers(state: &ServiceState, request: &GenerateRequest) -> SyncResult<Vec<u32>> {
        if request.layer_ids.is_empty() {
            return match request.sync_model {
                SyncModel::Layer => Err(SyncError::invalid(
                    "per-layer sync needs at least one layer id",
                )),
                SyncModel::Geodatabase => Ok(state.layers.keys().copied().collect()),
            };
        }
        let mut ids = request.layer_ids.clone();
        ids.sort_unstable();
        ids.dedup();
        if let Some(unknown) = ids.iter().find(|id| !state.layers.contains_key(id)) {
            return Err(SyncError::remote(format!("service has no layer {unknown}")));
        }
        Ok(ids)
    }
}

#[async_trait]
impl FeatureService for InMemoryFeatureService {
    fn service_url(&self) -> &str {
        &self.url
    }

    async fn submit_generate(&self, request: &GenerateRequest) -> SyncResult<RemoteJobId> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock();
        state.calls.generate += 1;
        state.take_fault(ServiceCall::Generate)?;

        let layer_ids = Self::resolve_layers(&state, request)?;
        let tables: Vec<TableSchema> = layer_ids
            .iter()
            .filter_map(|id| state.layers.get(id))
            .cloned()
            .collect();
        let names = state.layer_names(&layer_ids);
        let features = state
            .features
            .iter()
            .filter(|(_, stored)| names.contains(&stored.layer))
            .filter(|(_, stored)| intersects(&stored.data, &request.extent))
            .map(|(gid, stored)| {
                FeatureChange::insert(stored.layer.clone(), *gid, stored.data.clone())
            })
            .collect();

        let replica = ReplicaInfo::new(
            Uuid::new_v4(),
            self.url.clone(),
            request.sync_model,
            request.extent,
            layer_ids,
        );
        state.next_job += 1;
        let job = RemoteJobId(format!("generate-{}", state.next_job));
        let pending = PendingGeneration {
            polls_left: state.polls_per_job,
            replica: GeneratedReplica {
                replica,
                tables,
                features,
                server_generation: state.generation,
            },
        };
        state.jobs.insert(job.clone(), pending);
        debug!(%job, "generation job submitted");
        Ok(job)
    }

    async fn poll_generate(&self, job: &RemoteJobId) -> SyncResult<GenerateStatus> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock();
        state.calls.poll += 1;
        state.take_fault(ServiceCall::Poll)?;

        let pending = state
            .jobs
            .get_mut(job)
            .ok_or_else(|| SyncError::Protocol(format!("unknown generation job {job}")))?;
        if pending.polls_left > 0 {
            pending.polls_left -= 1;
            return Ok(GenerateStatus::Pending);
        }
        let Some(done) = state.jobs.remove(job) else {
            return Ok(GenerateStatus::Failed(format!("generation job {job} vanished")));
        };
        let names = state.layer_names(&done.replica.replica.layer_ids);
        state.replicas.insert(done.replica.replica.replica_id, names);
        Ok(GenerateStatus::Ready(done.replica))
    }

    async fn upload(&self, request: &UploadRequest) -> SyncResult<UploadResponse> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock();
        state.calls.upload += 1;
        state.take_fault(ServiceCall::Upload)?;

        let layers = state
            .replicas
            .get(&request.replica_id)
            .ok_or_else(|| SyncError::remote(format!("unknown replica {}", request.replica_id)))?;
        if let Some(change) = request.changes.iter().find(|c| !layers.contains(&c.table)) {
            return Err(SyncError::remote(format!(
                "replica does not include layer {:?}",
                change.table
            )));
        }

        if !request.changes.is_empty() {
            state.generation += 1;
            for change in &request.changes {
                state.record(Some(request.replica_id), change.clone());
            }
        }
        debug!(
            replica = %request.replica_id,
            accepted = request.changes.len(),
            generation = state.generation,
            "upload applied"
        );
        Ok(UploadResponse {
            server_generation: state.generation,
            accepted: request.changes.len(),
        })
    }

    async fn download(&self, request: &DownloadRequest) -> SyncResult<DownloadResponse> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock();
        state.calls.download += 1;
        state.take_fault(ServiceCall::Download)?;

        let layers = state
            .replicas
            .get(&request.replica_id)
            .ok_or_else(|| SyncError::remote(format!("unknown replica {}", request.replica_id)))?;

        let mut touched: Vec<(GlobalId, &str)> = Vec::new();
        for revision in &state.revisions {
            if revision.generation <= request.since_generation
                || revision.origin == Some(request.replica_id)
                || !layers.contains(&revision.layer)
            {
                continue;
            }
            if !touched.iter().any(|(gid, _)| *gid == revision.global_id) {
                touched.push((revision.global_id, revision.layer.as_str()));
            }
        }

        let changes = touched
            .into_iter()
            .map(|(gid, layer)| match state.features.get(&gid) {
                Some(stored) => {
                    FeatureChange::update(stored.layer.clone(), gid, stored.data.clone())
                }
                None => FeatureChange::delete(layer, gid),
            })
            .collect();
        Ok(DownloadResponse {
            changes,
            server_generation: state.generation,
        })
    }
}

fn intersects(data: &FeatureData, extent: &Rect<f64>) -> bool {
    let Some(bounds) = data.geometry.as_ref().and_then(|g| g.bounding_rect()) else {
        return false;
    };
    bounds.min().x <= extent.max().x
        && bounds.max().x >= extent.min().x
        && bounds.min().y <= extent.max().y
        && bounds.max().y >= extent.min().y
}
