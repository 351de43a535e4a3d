//! Feature editing.

use crate::error::{CoreError, CoreResult};
use crate::feature::{Feature, Table};
use crate::geometry::Geometry;
use crate::schema::AttributeValue;
use crate::store::LocalStore;
use crate::transaction::PendingWrite;
use crate::types::{FeatureId, GlobalId};
use tokio::sync::oneshot;
use tracing::debug;

/// Creates, edits and deletes features of a [`LocalStore`].
///
/// Every edit goes through the store's transaction manager: inside a
/// transaction it is buffered until commit, outside one it either fails with
/// [`CoreError::Policy`] or is committed on its own, depending on
/// [`LocalStore::require_transactions`].
///
/// Edits are checked before anything is staged, so a rejected edit leaves
/// the transaction as it was.
#[derive(Clone, Debug)]
pub struct FeatureMutator {
    store: LocalStore,
}

impl FeatureMutator {
    /// Creates a mutator for `store`.
    #[must_use]
    pub fn new(store: &LocalStore) -> Self {
        Self {
            store: store.clone(),
        }
    }

    /// Returns a new, unsaved feature of `table` with a fresh global id.
    pub fn create_feature(&self, table: &Table) -> CoreResult<Feature> {
        self.store.transactions().ensure_open()?;
        Ok(Feature::new(table.clone()))
    }

    /// Sets an attribute on an unsaved or loaded feature.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Schema`] if the table has no such field or the
    /// value does not fit it.
    pub fn set_attribute(
        &self,
        feature: &mut Feature,
        name: &str,
        value: impl Into<AttributeValue>,
    ) -> CoreResult<()> {
        feature.set_attribute(name, value)
    }

    /// Adds a new feature to `table` and assigns its id.
    ///
    /// # Errors
    ///
    /// - [`CoreError::Validation`] if the feature belongs to another table,
    ///   was already added, or its geometry is missing, invalid or outside
    ///   the table extent
    /// - [`CoreError::DuplicateGlobalId`] if its global id is taken
    /// - [`CoreError::Policy`] outside a transaction when one is required
    /// - [`CoreError::Conflict`] while a synchronization is running
    pub fn add_feature(&self, table: &Table, feature: &mut Feature) -> CoreResult<FeatureId> {
        if feature.table().id() != table.id() {
            return Err(CoreError::validation(format!(
                "feature belongs to table {}, not {}",
                feature.table().name(),
                table.name()
            )));
        }
        if let Some(id) = feature.id() {
            return Err(CoreError::validation(format!(
                "feature {id} has already been added"
            )));
        }
        feature.validate(self.store.extent_tolerance())?;

        let global_id = feature.global_id();
        let data = feature.data().clone();
        let id = self.store.transactions().stage(|txn, index| {
            if index.locate(global_id).is_some() || txn.find_global(global_id).is_some() {
                return Err(CoreError::DuplicateGlobalId(global_id));
            }
            let id = index.allocate_feature_id();
            txn.put(table.id(), id, global_id, data, true);
            Ok(id)
        })?;

        feature.assign_id(id);
        debug!(table = table.name(), feature = %id, "feature added");
        Ok(id)
    }

    /// Saves the current state of a previously added feature.
    ///
    /// # Errors
    ///
    /// [`CoreError::FeatureNotFound`] if the feature was deleted, plus the
    /// checks of [`FeatureMutator::add_feature`].
    pub fn update_feature(&self, feature: &Feature) -> CoreResult<()> {
        let table = feature.table();
        let id = feature
            .id()
            .ok_or_else(|| CoreError::validation("feature has not been added yet"))?;
        feature.validate(self.store.extent_tolerance())?;

        let global_id = feature.global_id();
        let data = feature.data().clone();
        self.store.transactions().stage(|txn, index| {
            let exists = match txn.get(table.id(), id) {
                Some(PendingWrite::Put { .. }) => true,
                Some(PendingWrite::Delete { .. }) => false,
                None => index.row(table.id(), id).is_some(),
            };
            if !exists {
                return Err(not_found(table, id));
            }
            txn.put(table.id(), id, global_id, data, false);
            Ok(())
        })?;

        debug!(table = table.name(), feature = %id, "feature updated");
        Ok(())
    }

    /// Deletes a feature.
    ///
    /// # Errors
    ///
    /// [`CoreError::FeatureNotFound`] if there is no such feature.
    pub fn delete_feature(&self, table: &Table, id: FeatureId) -> CoreResult<()> {
        self.store.transactions().stage(|txn, index| {
            let global_id: Option<GlobalId> = match txn.get(table.id(), id) {
                Some(PendingWrite::Put { global_id, .. }) => Some(*global_id),
                Some(PendingWrite::Delete { .. }) => None,
                None => index.row(table.id(), id).map(|row| row.global_id),
            };
            let global_id = global_id.ok_or_else(|| not_found(table, id))?;
            txn.delete(table.id(), id, global_id);
            Ok(())
        })?;

        debug!(table = table.name(), feature = %id, "feature deleted");
        Ok(())
    }

    /// Adds a feature once its geometry has been supplied.
    ///
    /// Waits for `request` to resolve, sets the geometry on `feature`, then
    /// behaves as [`FeatureMutator::add_feature`].
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Cancelled`] if the geometry was cancelled or the
    /// sender was dropped. Nothing is staged in that case.
    pub async fn add_feature_interactive(
        &self,
        table: &Table,
        feature: &mut Feature,
        request: GeometryRequest,
    ) -> CoreResult<FeatureId> {
        let geometry = request.wait().await?;
        feature.set_geometry(geometry);
        self.add_feature(table, feature)
    }
}

fn not_found(table: &Table, id: FeatureId) -> CoreError {
    CoreError::FeatureNotFound {
        table: table.name().to_string(),
        id,
    }
}

/// Supplies the geometry for a pending [`GeometryRequest`].
#[derive(Debug)]
pub struct GeometrySender {
    tx: oneshot::Sender<Option<Geometry>>,
}

impl GeometrySender {
    /// Completes the request with `geometry`.
    ///
    /// Returns false if the request was already dropped.
    pub fn provide(self, geometry: Geometry) -> bool {
        self.tx.send(Some(geometry)).is_ok()
    }

    /// Cancels the request.
    pub fn cancel(self) {
        let _ = self.tx.send(None);
    }
}

/// A geometry that will be supplied later, typically by a sketch tool.
#[derive(Debug)]
pub struct GeometryRequest {
    rx: oneshot::Receiver<Option<Geometry>>,
}

impl GeometryRequest {
    /// Creates a connected sender and request.
    #[must_use]
    pub fn channel() -> (GeometrySender, GeometryRequest) {
        let (tx, rx) = oneshot::channel();
        (GeometrySender { tx }, GeometryRequest { rx })
    }

    /// Waits for the geometry.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Cancelled`] if the request was cancelled or its
    /// sender dropped.
    pub async fn wait(self) -> CoreResult<Geometry> {
        match self.rx.await {
            Ok(Some(geometry)) => Ok(geometry),
            Ok(None) | Err(_) => Err(CoreError::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::feature::FeatureData;
    use crate::geometry::GeometryType;
    use crate::replica::{DatasetSeed, ReplicaInfo, SyncModel};
    use crate::schema::{FieldDef, FieldType, TableSchema};
    use crate::FeatureChange;
    use geo::{coord, LineString, Rect};
    use mapvault_storage::InMemoryBackend;
    use uuid::Uuid;

    fn store(config: StoreConfig) -> LocalStore {
        let extent = Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 100.0, y: 100.0 });
        let replica =
            ReplicaInfo::new(Uuid::new_v4(), "memory://", SyncModel::Layer, extent, vec![0, 1]);
        let sites = TableSchema::new(0, "Sites", GeometryType::Point, extent)
            .with_field(FieldDef::new("name", FieldType::Text).required())
            .with_field(FieldDef::new("depth", FieldType::Float));
        let tracks = TableSchema::new(1, "Tracks", GeometryType::Line, extent);
        let seed = DatasetSeed::new(replica, vec![sites, tracks]);
        LocalStore::create_with_backend(Box::new(InMemoryBackend::new()), &seed, config).unwrap()
    }

    fn site(store: &LocalStore, x: f64) -> Feature {
        let sites = store.table("Sites").unwrap();
        let mutator = store.mutator();
        let mut feature = mutator.create_feature(&sites).unwrap();
        feature.set_geometry(Geometry::point(x, 10.0));
        mutator.set_attribute(&mut feature, "name", "reef").unwrap();
        feature
    }

    #[test]
    fn rejected_features_stage_nothing() {
        let store = store(StoreConfig::default());
        let sites = store.table("Sites").unwrap();
        let tracks = store.table("Tracks").unwrap();
        let mutator = store.mutator();
        store.begin().unwrap();

        let mut outside = site(&store, 500.0);
        assert!(matches!(
            mutator.add_feature(&sites, &mut outside),
            Err(CoreError::Validation { .. })
        ));

        let mut bare = mutator.create_feature(&sites).unwrap();
        assert!(matches!(
            mutator.add_feature(&sites, &mut bare),
            Err(CoreError::Validation { .. })
        ));

        let mut wrong_table = site(&store, 5.0);
        assert!(matches!(
            mutator.add_feature(&tracks, &mut wrong_table),
            Err(CoreError::Validation { .. })
        ));

        let mut point_track = mutator.create_feature(&tracks).unwrap();
        point_track.set_geometry(Geometry::point(1.0, 1.0));
        assert!(matches!(
            mutator.add_feature(&tracks, &mut point_track),
            Err(CoreError::Validation { .. })
        ));

        let mut degenerate = mutator.create_feature(&tracks).unwrap();
        degenerate.set_geometry(Geometry::Line(LineString::from(vec![(1.0, 1.0), (1.0, 1.0)])));
        assert!(matches!(
            mutator.add_feature(&tracks, &mut degenerate),
            Err(CoreError::Validation { .. })
        ));

        assert_eq!(store.row_count(&sites).unwrap(), 0);
        assert_eq!(store.row_count(&tracks).unwrap(), 0);
    }

    #[test]
    fn extent_tolerance_is_applied() {
        let store = store(StoreConfig::default().extent_tolerance(5.0));
        let sites = store.table("Sites").unwrap();
        store.begin().unwrap();
        let mut near = site(&store, 103.0);
        store.mutator().add_feature(&sites, &mut near).unwrap();
    }

    #[test]
    fn attributes_are_checked_against_schema() {
        let store = store(StoreConfig::default());
        let sites = store.table("Sites").unwrap();
        let mutator = store.mutator();
        let mut feature = site(&store, 1.0);

        assert!(matches!(
            mutator.set_attribute(&mut feature, "colour", "red"),
            Err(CoreError::Schema { .. })
        ));
        assert!(matches!(
            mutator.set_attribute(&mut feature, "name", 4_i64),
            Err(CoreError::Schema { .. })
        ));
        mutator.set_attribute(&mut feature, "depth", 12_i64).unwrap();
        assert_eq!(feature.attribute("depth"), Some(&AttributeValue::Float(12.0)));

        store.begin().unwrap();
        mutator.add_feature(&sites, &mut feature).unwrap();
        assert!(matches!(
            mutator.add_feature(&sites, &mut feature),
            Err(CoreError::Validation { .. })
        ));
    }

    #[test]
    fn duplicate_global_id_is_rejected() {
        let store = store(StoreConfig::default());
        let sites = store.table("Sites").unwrap();
        let mutator = store.mutator();
        store.begin().unwrap();
        let mut first = site(&store, 1.0);
        let mut copy = first.clone();
        mutator.add_feature(&sites, &mut first).unwrap();

        assert!(matches!(
            mutator.add_feature(&sites, &mut copy),
            Err(CoreError::DuplicateGlobalId(_))
        ));
    }

    #[test]
    fn update_and_delete() {
        let store = store(StoreConfig::default());
        let sites = store.table("Sites").unwrap();
        let mutator = store.mutator();

        store.begin().unwrap();
        let mut feature = site(&store, 1.0);
        let id = mutator.add_feature(&sites, &mut feature).unwrap();
        store.commit().unwrap();

        store.begin().unwrap();
        let mut loaded = store.get_feature(&sites, id).unwrap().unwrap();
        mutator.set_attribute(&mut loaded, "depth", 3.5).unwrap();
        mutator.update_feature(&loaded).unwrap();
        assert_eq!(
            store.get_feature(&sites, id).unwrap().unwrap().attribute("depth"),
            Some(&AttributeValue::Float(3.5))
        );
        mutator.delete_feature(&sites, id).unwrap();
        assert!(store.get_feature(&sites, id).unwrap().is_none());
        assert!(matches!(
            mutator.update_feature(&loaded),
            Err(CoreError::FeatureNotFound { .. })
        ));
        assert!(matches!(
            mutator.delete_feature(&sites, id),
            Err(CoreError::FeatureNotFound { .. })
        ));
        assert_eq!(store.row_count(&sites).unwrap(), 0);

        store.rollback().unwrap();
        assert_eq!(
            store.get_feature(&sites, id).unwrap().unwrap().attribute("depth"),
            None
        );
    }

    #[test]
    fn pending_changes_collapse() {
        let store = store(StoreConfig::default().require_transactions(false));
        let sites = store.table("Sites").unwrap();
        let mutator = store.mutator();

        let mut kept = site(&store, 1.0);
        let kept_id = mutator.add_feature(&sites, &mut kept).unwrap();
        mutator.set_attribute(&mut kept, "depth", 2.0).unwrap();
        mutator.update_feature(&kept).unwrap();

        let mut dropped = site(&store, 2.0);
        let dropped_id = mutator.add_feature(&sites, &mut dropped).unwrap();
        mutator.delete_feature(&sites, dropped_id).unwrap();

        let changes = store.pending_changes().unwrap();
        assert_eq!(changes.len(), 1);
        let FeatureChange { table, global_id, op } = &changes[0];
        assert_eq!(table, "Sites");
        assert_eq!(*global_id, kept.global_id());
        assert_eq!(op.kind(), "insert");
        assert_eq!(
            op.data().and_then(|d| d.attributes.get("depth")),
            Some(&AttributeValue::Float(2.0))
        );
        assert!(store.get_feature(&sites, kept_id).unwrap().is_some());
    }

    #[test]
    fn remote_rows_win_over_local_edits() {
        let store = store(StoreConfig::default().require_transactions(false));
        let sites = store.table("Sites").unwrap();
        let mutator = store.mutator();
        let mut feature = site(&store, 1.0);
        let id = mutator.add_feature(&sites, &mut feature).unwrap();

        let remote =
            FeatureData::with_geometry(Geometry::point(9.0, 9.0)).attribute("name", "wreck");
        let lease = store.begin_sync().unwrap();
        assert!(matches!(
            mutator.delete_feature(&sites, id),
            Err(CoreError::Conflict { .. })
        ));
        store
            .apply_sync(
                &lease,
                &[FeatureChange::update("Sites", feature.global_id(), remote)],
                2,
                false,
            )
            .unwrap();
        drop(lease);

        let stored = store.get_feature(&sites, id).unwrap().unwrap();
        assert_eq!(stored.attribute("name").and_then(AttributeValue::as_str), Some("wreck"));
        assert_eq!(store.pending_change_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn interactive_add_waits_for_geometry() {
        let store = store(StoreConfig::default());
        let sites = store.table("Sites").unwrap();
        let mutator = store.mutator();
        store.begin().unwrap();

        let mut feature = mutator.create_feature(&sites).unwrap();
        mutator.set_attribute(&mut feature, "name", "buoy").unwrap();
        let (sender, request) = GeometryRequest::channel();
        let sketch = tokio::spawn(async move { sender.provide(Geometry::point(4.0, 4.0)) });

        let id = mutator
            .add_feature_interactive(&sites, &mut feature, request)
            .await
            .unwrap();
        assert!(sketch.await.unwrap());
        assert_eq!(feature.id(), Some(id));
        store.commit().unwrap();
        assert_eq!(store.row_count(&sites).unwrap(), 1);
    }

    #[tokio::test]
    async fn cancelled_geometry_adds_nothing() {
        let store = store(StoreConfig::default());
        let sites = store.table("Sites").unwrap();
        let mutator = store.mutator();
        store.begin().unwrap();

        let mut feature = mutator.create_feature(&sites).unwrap();
        let (sender, request) = GeometryRequest::channel();
        sender.cancel();
        assert!(matches!(
            mutator.add_feature_interactive(&sites, &mut feature, request).await,
            Err(CoreError::Cancelled)
        ));

        let (sender, request) = GeometryRequest::channel();
        drop(sender);
        assert!(matches!(
            mutator.add_feature_interactive(&sites, &mut feature, request).await,
            Err(CoreError::Cancelled)
        ));

        store.commit().unwrap();
        assert!(feature.id().is_none());
        assert_eq!(store.row_count(&sites).unwrap(), 0);
    }
}
