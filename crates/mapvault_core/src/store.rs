//! The local store facade and dataset lifecycle.

use crate::config::StoreConfig;
use crate::error::{CoreError, CoreResult};
use crate::events::{EventFeed, StoreEvent};
use crate::feature::{ChangeOp, Feature, FeatureChange, FeatureData, Table};
use crate::index::{DatasetIndex, DeltaKind, TableSlot};
use crate::log::{DatasetLog, LogRecord, Origin, RecordLocation};
use crate::mutator::FeatureMutator;
use crate::recovery::{self, Recovered};
use crate::replica::{DatasetSeed, ReplicaInfo, SyncPoint};
use crate::transaction::{PendingWrite, SyncLease, TransactionManager};
use crate::types::{FeatureId, GlobalId, SequenceNumber, TableId, TransactionId};
use chrono::Utc;
use mapvault_storage::{FileBackend, StorageBackend};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// A local dataset mirrored from a remote feature service.
///
/// `LocalStore` owns the dataset file for its whole lifetime: opening takes
/// an exclusive lock on the file, and the lock is released by
/// [`LocalStore::close`] or when the last handle is dropped.
///
/// Handles are cheap to clone and share one dataset.
///
/// # Example
///
/// ```rust,no_run
/// use mapvault_core::{Geometry, LocalStore};
///
/// let store = LocalStore::open("offline/marine.mvds")?;
/// let birds = store.table("Birds")?;
/// let mutator = store.mutator();
///
/// store.begin()?;
/// let mut bird = mutator.create_feature(&birds)?;
/// bird.set_geometry(Geometry::point(-117.2, 32.7));
/// mutator.set_attribute(&mut bird, "type", 3_i64)?;
/// mutator.add_feature(&birds, &mut bird)?;
/// store.commit()?;
/// # Ok::<(), mapvault_core::CoreError>(())
/// ```
#[derive(Clone)]
pub struct LocalStore {
    inner: Arc<StoreInner>,
}

/// A non-owning handle to a [`LocalStore`].
///
/// It does not keep the dataset open: once every [`LocalStore`] handle is
/// dropped, [`WeakStore::upgrade`] returns `None`.
#[derive(Clone, Default)]
pub struct WeakStore {
    inner: Weak<StoreInner>,
}

impl WeakStore {
    /// Returns a handle to the store if it is still open.
    #[must_use]
    pub fn upgrade(&self) -> Option<LocalStore> {
        let store = LocalStore {
            inner: self.inner.upgrade()?,
        };
        (!store.is_closed()).then_some(store)
    }
}

impl std::fmt::Debug for WeakStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakStore")
            .field("live", &(self.inner.strong_count() > 0))
            .finish()
    }
}

struct StoreInner {
    path: PathBuf,
    config: StoreConfig,
    log: Arc<DatasetLog>,
    index: Arc<RwLock<DatasetIndex>>,
    transactions: TransactionManager,
    events: Arc<EventFeed<StoreEvent>>,
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        self.transactions.close();
        if let Ok(true) = self.log.close() {
            debug!(path = %self.path.display(), "dataset closed on drop");
        }
    }
}

enum Lookup {
    Pending(FeatureData, GlobalId),
    Stored(RecordLocation),
    Missing,
}

impl LocalStore {
    /// Opens an existing dataset with the default configuration.
    ///
    /// # Errors
    ///
    /// - [`CoreError::NotFound`] if no file exists at `path`
    /// - [`CoreError::Locked`] if another handle has it open
    /// - [`CoreError::Corrupted`] or [`CoreError::ChecksumMismatch`] if the
    ///   file is damaged
    pub fn open(path: impl AsRef<Path>) -> CoreResult<Self> {
        Self::open_with_config(path, StoreConfig::default())
    }

    /// Opens an existing dataset.
    pub fn open_with_config(path: impl AsRef<Path>, config: StoreConfig) -> CoreResult<Self> {
        let path = path.as_ref();
        let backend = FileBackend::open_existing(path)?;
        backend.lock_exclusive()?;
        Self::from_backend(path.to_path_buf(), Box::new(backend), config)
    }

    /// Opens a dataset held by an arbitrary backend.
    ///
    /// The store's [`LocalStore::path`] is empty.
    pub fn open_with_backend(
        backend: Box<dyn StorageBackend>,
        config: StoreConfig,
    ) -> CoreResult<Self> {
        Self::from_backend(PathBuf::new(), backend, config)
    }

    /// Materializes a new dataset file at `path` and opens it.
    ///
    /// The dataset is written to a temporary file beside `path` and linked
    /// into place once durable, so `path` never holds a partial dataset. A
    /// file that appears at `path` meanwhile is left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::AlreadyExists`] if `path` exists, and
    /// [`CoreError::Schema`] or [`CoreError::Validation`] if the seed does
    /// not describe a consistent dataset.
    pub fn create(
        path: impl AsRef<Path>,
        seed: &DatasetSeed,
        config: StoreConfig,
    ) -> CoreResult<Self> {
        let path = path.as_ref();
        if path.exists() {
            return Err(CoreError::AlreadyExists(path.to_path_buf()));
        }

        let records = seed_records(seed)?;
        let partial = partial_path(path);
        let written = (|| -> CoreResult<()> {
            let log = DatasetLog::new(Box::new(FileBackend::create_new(&partial)?));
            log.append_batch(&records)?;
            log.sync()?;
            log.close()?;
            Ok(())
        })();
        if let Err(e) = written {
            discard_partial(&partial);
            return Err(e);
        }
        publish(&partial, path)?;

        info!(
            path = %path.display(),
            tables = seed.tables.len(),
            features = seed.features.len(),
            "dataset materialized"
        );
        Self::open_with_config(path, config)
    }

    /// Writes a new dataset into an empty backend and opens it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::AlreadyExists`] if the backend is not empty.
    pub fn create_with_backend(
        backend: Box<dyn StorageBackend>,
        seed: &DatasetSeed,
        config: StoreConfig,
    ) -> CoreResult<Self> {
        if backend.size()? != 0 {
            return Err(CoreError::AlreadyExists(PathBuf::new()));
        }
        let records = seed_records(seed)?;
        let log = DatasetLog::new(backend);
        log.append_batch(&records)?;
        log.sync()?;
        Self::from_log(PathBuf::new(), log, config)
    }

    fn from_backend(
        path: PathBuf,
        backend: Box<dyn StorageBackend>,
        config: StoreConfig,
    ) -> CoreResult<Self> {
        Self::from_log(path, DatasetLog::new(backend), config)
    }

    fn from_log(path: PathBuf, log: DatasetLog, config: StoreConfig) -> CoreResult<Self> {
        let log = Arc::new(log);
        let Recovered {
            index,
            truncated_bytes,
        } = recovery::recover(&log)?;

        info!(
            path = %path.display(),
            tables = index.tables.len(),
            pending = index.delta_len(),
            truncated_bytes,
            "dataset opened"
        );

        let index = Arc::new(RwLock::new(index));
        let events = Arc::new(EventFeed::new());
        let transactions = TransactionManager::new(
            Arc::clone(&log),
            Arc::clone(&index),
            Arc::clone(&events),
            config.require_transactions,
            config.sync_on_commit,
        );
        Ok(Self {
            inner: Arc::new(StoreInner {
                path,
                config,
                log,
                index,
                transactions,
                events,
            }),
        })
    }

    /// Returns a handle that does not keep the dataset open.
    #[must_use]
    pub fn downgrade(&self) -> WeakStore {
        WeakStore {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Path of the dataset file. Empty for stores opened over a backend.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Configuration the store was opened with.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// The store's transaction manager.
    #[must_use]
    pub fn transactions(&self) -> &TransactionManager {
        &self.inner.transactions
    }

    /// Returns a mutator for editing features of this store.
    #[must_use]
    pub fn mutator(&self) -> FeatureMutator {
        FeatureMutator::new(self)
    }

    /// Subscribes to transaction and sync events.
    pub fn subscribe(&self) -> Receiver<StoreEvent> {
        self.inner.events.subscribe()
    }

    // ------------------------------------------------------------------
    // Tables
    // ------------------------------------------------------------------

    /// Returns all tables in definition order.
    ///
    /// Table definitions are read from the file on first access and cached;
    /// later calls return handles sharing the cached schema.
    pub fn tables(&self) -> CoreResult<Vec<Table>> {
        self.inner.transactions.ensure_open()?;
        let index = self.inner.index.read();
        index
            .tables
            .iter()
            .map(|slot| self.load_table(slot))
            .collect()
    }

    /// Returns the table called `name`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Schema`] if there is no such table.
    pub fn table(&self, name: &str) -> CoreResult<Table> {
        self.inner.transactions.ensure_open()?;
        let index = self.inner.index.read();
        let slot = index
            .table_by_name(name)
            .ok_or_else(|| CoreError::schema(format!("dataset has no table {name:?}")))?;
        self.load_table(slot)
    }

    fn table_by_id(&self, id: TableId) -> CoreResult<Table> {
        let index = self.inner.index.read();
        let slot = index
            .table_by_id(id)
            .ok_or_else(|| CoreError::corrupted(format!("row refers to unknown {id}")))?;
        self.load_table(slot)
    }

    fn load_table(&self, slot: &TableSlot) -> CoreResult<Table> {
        if let Some(schema) = slot.schema.read().as_ref() {
            return Ok(Table::new(slot.id, Arc::clone(schema)));
        }

        let mut cached = slot.schema.write();
        if let Some(schema) = cached.as_ref() {
            return Ok(Table::new(slot.id, Arc::clone(schema)));
        }
        let schema = match self.inner.log.read(slot.location)? {
            LogRecord::TableDef { schema, .. } => Arc::new(schema),
            other => {
                return Err(CoreError::corrupted(format!(
                    "expected definition of {}, found {:?}",
                    slot.id,
                    other.record_type()
                )))
            }
        };
        debug!(table = %schema.name, fields = schema.fields.len(), "table schema loaded");
        *cached = Some(Arc::clone(&schema));
        Ok(Table::new(slot.id, schema))
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    /// Returns true while a transaction is active.
    #[must_use]
    pub fn is_in_transaction(&self) -> bool {
        self.inner.transactions.is_active()
    }

    /// Starts a transaction. See [`TransactionManager::begin`].
    pub fn begin(&self) -> CoreResult<bool> {
        self.inner.transactions.begin()
    }

    /// Commits the active transaction. See [`TransactionManager::commit`].
    pub fn commit(&self) -> CoreResult<Option<SequenceNumber>> {
        self.inner.transactions.commit()
    }

    /// Discards the active transaction. See [`TransactionManager::rollback`].
    pub fn rollback(&self) -> CoreResult<bool> {
        self.inner.transactions.rollback()
    }

    /// Returns the transaction policy.
    #[must_use]
    pub fn require_transactions(&self) -> bool {
        self.inner.transactions.require_transactions()
    }

    /// Changes the transaction policy.
    /// See [`TransactionManager::set_require_transactions`].
    pub fn set_require_transactions(&self, value: bool) -> CoreResult<()> {
        self.inner.transactions.set_require_transactions(value)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Reads one feature, including edits of the active transaction.
    pub fn get_feature(&self, table: &Table, id: FeatureId) -> CoreResult<Option<Feature>> {
        let lookup = self.inner.transactions.read(|txn, index| {
            match txn.and_then(|t| t.get(table.id(), id)) {
                Some(PendingWrite::Put {
                    global_id, data, ..
                }) => Lookup::Pending(data.clone(), *global_id),
                Some(PendingWrite::Delete { .. }) => Lookup::Missing,
                None => index
                    .row(table.id(), id)
                    .map_or(Lookup::Missing, |row| Lookup::Stored(row.location)),
            }
        })?;

        match lookup {
            Lookup::Pending(data, global_id) => {
                Ok(Some(Feature::stored(table.clone(), id, global_id, data)))
            }
            Lookup::Stored(location) => self.read_row(table, location).map(Some),
            Lookup::Missing => Ok(None),
        }
    }

    /// Reads every feature of a table in id order, including edits of the
    /// active transaction.
    pub fn features(&self, table: &Table) -> CoreResult<Vec<Feature>> {
        let rows = self.inner.transactions.read(|txn, index| {
            let mut rows: BTreeMap<FeatureId, Lookup> = index
                .rows(table.id())
                .map(|(id, row)| (id, Lookup::Stored(row.location)))
                .collect();
            if let Some(txn) = txn {
                for (id, write) in txn.writes_for(table.id()) {
                    match write {
                        PendingWrite::Put {
                            global_id, data, ..
                        } => {
                            rows.insert(id, Lookup::Pending(data.clone(), *global_id));
                        }
                        PendingWrite::Delete { .. } => {
                            rows.remove(&id);
                        }
                    }
                }
            }
            rows
        })?;

        rows.into_iter()
            .filter_map(|(id, lookup)| match lookup {
                Lookup::Pending(data, global_id) => {
                    Some(Ok(Feature::stored(table.clone(), id, global_id, data)))
                }
                Lookup::Stored(location) => Some(self.read_row(table, location)),
                Lookup::Missing => None,
            })
            .collect()
    }

    /// Number of rows in a table, including edits of the active transaction.
    pub fn row_count(&self, table: &Table) -> CoreResult<usize> {
        self.inner.transactions.read(|txn, index| {
            let committed = index.row_count(table.id());
            let Some(txn) = txn else {
                return committed;
            };
            txn.writes_for(table.id())
                .fold(committed, |count, (_, write)| match write {
                    PendingWrite::Put { is_new: true, .. } => count + 1,
                    PendingWrite::Put { .. } => count,
                    PendingWrite::Delete { .. } => count.saturating_sub(1),
                })
        })
    }

    /// Finds a feature in any table by its global id.
    pub fn find_by_global_id(&self, global_id: GlobalId) -> CoreResult<Option<Feature>> {
        let found = self.inner.transactions.read(|txn, index| {
            if let Some(((table_id, feature_id), write)) = txn.and_then(|t| t.find_global(global_id))
            {
                return match write {
                    PendingWrite::Put { data, .. } => {
                        Some((table_id, feature_id, Lookup::Pending(data.clone(), global_id)))
                    }
                    PendingWrite::Delete { .. } => None,
                };
            }
            let (table_id, feature_id) = index.locate(global_id)?;
            let row = index.row(table_id, feature_id)?;
            Some((table_id, feature_id, Lookup::Stored(row.location)))
        })?;

        let Some((table_id, feature_id, lookup)) = found else {
            return Ok(None);
        };
        let table = self.table_by_id(table_id)?;
        match lookup {
            Lookup::Pending(data, global_id) => Ok(Some(Feature::stored(
                table, feature_id, global_id, data,
            ))),
            Lookup::Stored(location) => self.read_row(&table, location).map(Some),
            Lookup::Missing => Ok(None),
        }
    }

    fn read_row(&self, table: &Table, location: RecordLocation) -> CoreResult<Feature> {
        match self.inner.log.read(location)? {
            LogRecord::Put {
                feature_id,
                global_id,
                data,
                ..
            } => Ok(Feature::stored(table.clone(), feature_id, global_id, data)),
            other => Err(CoreError::corrupted(format!(
                "expected a row at offset {}, found {:?}",
                location.offset,
                other.record_type()
            ))),
        }
    }

    // ------------------------------------------------------------------
    // Replica and sync
    // ------------------------------------------------------------------

    /// Replica metadata recorded when the dataset was generated.
    pub fn replica(&self) -> CoreResult<ReplicaInfo> {
        self.inner.transactions.read(|_, index| index.replica.clone())
    }

    /// The last successful synchronization.
    pub fn last_sync(&self) -> CoreResult<Option<SyncPoint>> {
        self.inner.transactions.read(|_, index| index.last_sync)
    }

    /// Committed local changes not yet uploaded, collapsed per feature.
    ///
    /// An insert followed by updates is reported as one insert; an insert
    /// followed by a delete is not reported. Edits of the active transaction
    /// are not included.
    pub fn pending_changes(&self) -> CoreResult<Vec<FeatureChange>> {
        let delta = self.inner.transactions.read(|_, index| {
            index
                .delta()
                .map(|((table_id, feature_id), entry)| {
                    let location = index.row(table_id, feature_id).map(|r| r.location);
                    (table_id, entry, location)
                })
                .collect::<Vec<_>>()
        })?;

        let mut tables: HashMap<TableId, Table> = HashMap::new();
        let mut changes = Vec::with_capacity(delta.len());
        for (table_id, entry, location) in delta {
            let table = match tables.get(&table_id) {
                Some(table) => table.clone(),
                None => {
                    let table = self.table_by_id(table_id)?;
                    tables.insert(table_id, table.clone());
                    table
                }
            };
            let name = table.name().to_string();
            let change = match (entry.kind, location) {
                (DeltaKind::Delete, _) => FeatureChange::delete(name, entry.global_id),
                (kind, Some(location)) => {
                    let data = self.read_row(&table, location)?.data().clone();
                    if kind == DeltaKind::Insert {
                        FeatureChange::insert(name, entry.global_id, data)
                    } else {
                        FeatureChange::update(name, entry.global_id, data)
                    }
                }
                (_, None) => {
                    return Err(CoreError::corrupted(format!(
                        "pending change for {} has no row",
                        entry.global_id
                    )))
                }
            };
            changes.push(change);
        }
        Ok(changes)
    }

    /// Number of features with pending local changes.
    pub fn pending_change_count(&self) -> CoreResult<usize> {
        self.inner.transactions.read(|_, index| index.delta_len())
    }

    /// Takes the sync lease. See [`TransactionManager::begin_sync`].
    pub fn begin_sync(&self) -> CoreResult<SyncLease> {
        self.inner.transactions.begin_sync()
    }

    /// Applies changes downloaded from the remote source as one atomic
    /// batch and records the sync.
    ///
    /// Remote rows replace local rows with the same global id, including
    /// rows with pending local edits. With `clear_local`, the local delta is
    /// considered uploaded and is cleared.
    ///
    /// # Errors
    ///
    /// [`CoreError::Schema`] or [`CoreError::Validation`] if a change does not
    /// fit the dataset. Nothing is written in that case.
    pub fn apply_sync(
        &self,
        lease: &SyncLease,
        changes: &[FeatureChange],
        server_generation: u64,
        clear_local: bool,
    ) -> CoreResult<usize> {
        let mut tables: HashMap<&str, Table> = HashMap::new();
        for change in changes {
            if !tables.contains_key(change.table.as_str()) {
                tables.insert(change.table.as_str(), self.table(&change.table)?);
            }
        }

        let point = SyncPoint {
            server_generation,
            synced_at: Utc::now(),
        };
        let applied = self.inner.transactions.commit_remote(
            lease,
            |txn, index| {
                for change in changes {
                    let table = tables
                        .get(change.table.as_str())
                        .ok_or_else(|| CoreError::schema(format!("no table {:?}", change.table)))?;
                    let gid = change.global_id;
                    let existing = txn
                        .find_global(gid)
                        .map(|(key, _)| key)
                        .or_else(|| index.locate(gid));
                    match &change.op {
                        ChangeOp::Insert(data) | ChangeOp::Update(data) => {
                            let data = check_row(table, data.clone())?;
                            let (feature_id, is_new) = match existing {
                                Some((table_id, _)) if table_id != table.id() => {
                                    return Err(CoreError::schema(format!(
                                        "feature {gid} cannot move to table {}",
                                        table.name()
                                    )))
                                }
                                Some((_, feature_id)) => {
                                    (feature_id, index.row(table.id(), feature_id).is_none())
                                }
                                None => (index.allocate_feature_id(), true),
                            };
                            txn.put(table.id(), feature_id, gid, data, is_new);
                        }
                        ChangeOp::Delete => {
                            if let Some((table_id, feature_id)) = existing {
                                txn.delete(table_id, feature_id, gid);
                            }
                        }
                    }
                }
                Ok(())
            },
            point,
            clear_local,
        )?;

        info!(server_generation, applied, clear_local, "remote changes applied");
        self.inner.events.emit(StoreEvent::Synced {
            server_generation,
            applied,
        });
        Ok(applied)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Flushes and closes the dataset, releasing the file lock.
    ///
    /// An active transaction is discarded. Later operations on any handle of
    /// this store fail with [`CoreError::Closed`]. Closing twice is a no-op.
    pub fn close(&self) -> CoreResult<()> {
        self.inner.transactions.close();
        if self.inner.log.close()? {
            info!(path = %self.inner.path.display(), "dataset closed");
        }
        Ok(())
    }

    /// Returns true once the store has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.log.is_closed()
    }

    pub(crate) fn extent_tolerance(&self) -> f64 {
        self.inner.config.extent_tolerance
    }
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore")
            .field("path", &self.inner.path)
            .field("transactions", &self.inner.transactions)
            .finish_non_exhaustive()
    }
}

/// Checks a row received from outside against a table.
fn check_row(table: &Table, data: FeatureData) -> CoreResult<FeatureData> {
    let geometry = data
        .geometry
        .ok_or_else(|| CoreError::validation("remote row has no geometry"))?;
    if geometry.geometry_type() != table.geometry_type() {
        return Err(CoreError::validation(format!(
            "table {} holds {} geometries, got {}",
            table.name(),
            table.geometry_type(),
            geometry.geometry_type()
        )));
    }
    geometry.validate()?;
    Ok(FeatureData {
        geometry: Some(geometry),
        attributes: table.schema().coerce_all(data.attributes)?,
    })
}

/// Header, table definitions, initial rows and the initial sync marker.
fn seed_records(seed: &DatasetSeed) -> CoreResult<Vec<LogRecord>> {
    let mut records = vec![LogRecord::Header(seed.replica.clone())];
    let mut tables: Vec<Table> = Vec::with_capacity(seed.tables.len());

    for (i, schema) in seed.tables.iter().enumerate() {
        if tables.iter().any(|t| t.name() == schema.name) {
            return Err(CoreError::schema(format!(
                "table {:?} defined twice",
                schema.name
            )));
        }
        let table_id =
            TableId::new(u32::try_from(i).map_err(|_| CoreError::schema("too many tables"))?);
        tables.push(Table::new(table_id, Arc::new(schema.clone())));
        records.push(LogRecord::TableDef {
            table_id,
            schema: schema.clone(),
        });
    }

    let mut sequence = SequenceNumber::new(0);
    if !seed.features.is_empty() {
        let txid = TransactionId::new(1);
        sequence = sequence.next();
        records.push(LogRecord::Begin {
            txid,
            origin: Origin::Remote,
        });
        let mut seen = HashSet::new();
        for (n, change) in seed.features.iter().enumerate() {
            let table = tables
                .iter()
                .find(|t| t.name() == change.table)
                .ok_or_else(|| CoreError::schema(format!("no table {:?}", change.table)))?;
            let data = match &change.op {
                ChangeOp::Insert(data) | ChangeOp::Update(data) => check_row(table, data.clone())?,
                ChangeOp::Delete => continue,
            };
            if !seen.insert(change.global_id) {
                return Err(CoreError::DuplicateGlobalId(change.global_id));
            }
            records.push(LogRecord::Put {
                txid,
                table_id: table.id(),
                feature_id: FeatureId::new(n as u64 + 1),
                global_id: change.global_id,
                data,
            });
        }
        records.push(LogRecord::Commit { txid, sequence });
    }

    records.push(LogRecord::SyncMarker {
        sequence: sequence.next(),
        point: SyncPoint {
            server_generation: seed.server_generation,
            synced_at: Utc::now(),
        },
        clears_local: true,
    });
    Ok(records)
}

/// Links the finished `partial` file to `path` and drops the temporary name.
/// Fails with [`CoreError::AlreadyExists`] rather than replacing `path`.
fn publish(partial: &Path, path: &Path) -> CoreResult<()> {
    let linked = std::fs::hard_link(partial, path);
    discard_partial(partial);
    match linked {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            Err(CoreError::AlreadyExists(path.to_path_buf()))
        }
        Err(e) => Err(e.into()),
    }
}

fn discard_partial(partial: &Path) {
    if let Err(e) = std::fs::remove_file(partial) {
        warn!(path = %partial.display(), error = %e, "could not remove temporary dataset file");
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".partial-{}", uuid::Uuid::new_v4().simple()));
    path.with_file_name(name)
}
