//! Transaction behaviour of `LocalStore` against a simple model.

use geo::{coord, Rect};
use mapvault_core::{
    AttributeValue, CoreError, DatasetSeed, FieldDef, FieldType, Geometry, GeometryType,
    LocalStore, ReplicaInfo, StoreConfig, SyncModel, TableSchema,
};
use mapvault_storage::InMemoryBackend;
use proptest::prelude::*;
use tempfile::tempdir;
use uuid::Uuid;

fn seed() -> DatasetSeed {
    let extent = Rect::new(coord! { x: -180.0, y: -90.0 }, coord! { x: 180.0, y: 90.0 });
    let replica = ReplicaInfo::new(
        Uuid::new_v4(),
        "memory://survey",
        SyncModel::Layer,
        extent,
        vec![0],
    );
    let points = TableSchema::new(0, "Observations", GeometryType::Point, extent)
        .with_field(FieldDef::new("count", FieldType::Integer));
    DatasetSeed::new(replica, vec![points])
}

fn add(store: &LocalStore, count: i64) -> Result<(), CoreError> {
    let table = store.table("Observations")?;
    let mutator = store.mutator();
    let mut feature = mutator.create_feature(&table)?;
    feature.set_geometry(Geometry::point(count as f64 % 180.0, 0.0));
    mutator.set_attribute(&mut feature, "count", count)?;
    mutator.add_feature(&table, &mut feature).map(|_| ())
}

#[derive(Debug, Clone, Copy)]
enum Op {
    Begin,
    Commit,
    Rollback,
    Add,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        1 => Just(Op::Begin),
        1 => Just(Op::Commit),
        1 => Just(Op::Rollback),
        3 => Just(Op::Add),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn transaction_state_machine(ops in prop::collection::vec(op(), 0..40)) {
        let store = LocalStore::create_with_backend(
            Box::new(InMemoryBackend::new()),
            &seed(),
            StoreConfig::default().sync_on_commit(false),
        )
        .unwrap();
        let table = store.table("Observations").unwrap();

        let mut active = false;
        let mut committed = 0usize;
        let mut pending = 0usize;

        for op in ops {
            match op {
                Op::Begin => {
                    prop_assert_eq!(store.begin().unwrap(), !active);
                    active = true;
                }
                Op::Commit => {
                    prop_assert_eq!(store.commit().unwrap().is_some(), active);
                    committed += pending;
                    pending = 0;
                    active = false;
                }
                Op::Rollback => {
                    prop_assert_eq!(store.rollback().unwrap(), active);
                    pending = 0;
                    active = false;
                }
                Op::Add => {
                    let result = add(&store, committed as i64);
                    if active {
                        prop_assert!(result.is_ok());
                        pending += 1;
                    } else {
                        let is_policy = matches!(result, Err(CoreError::Policy { .. }));
                        prop_assert!(is_policy);
                    }
                }
            }
            prop_assert_eq!(store.is_in_transaction(), active);
            prop_assert_eq!(store.row_count(&table).unwrap(), committed + pending);
        }

        store.rollback().unwrap();
        prop_assert_eq!(store.row_count(&table).unwrap(), committed);
        prop_assert_eq!(store.pending_change_count().unwrap(), committed);
    }
}

#[test]
fn uncommitted_work_is_gone_after_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("survey.mvds");

    let store = LocalStore::create(&path, &seed(), StoreConfig::default()).unwrap();
    store.begin().unwrap();
    add(&store, 1).unwrap();
    store.commit().unwrap();

    store.begin().unwrap();
    add(&store, 2).unwrap();
    add(&store, 3).unwrap();
    drop(store);

    let store = LocalStore::open(&path).unwrap();
    let table = store.table("Observations").unwrap();
    let counts: Vec<_> = store
        .features(&table)
        .unwrap()
        .iter()
        .map(|f| f.attribute("count").cloned())
        .collect();
    assert_eq!(counts, vec![Some(AttributeValue::Integer(1))]);
    assert!(!store.is_in_transaction());
}

#[test]
fn autocommit_edits_survive_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("survey.mvds");
    let config = StoreConfig::default().require_transactions(false);

    let store = LocalStore::create(&path, &seed(), config.clone()).unwrap();
    for i in 0..3 {
        add(&store, i).unwrap();
    }
    store.close().unwrap();

    let store = LocalStore::open_with_config(&path, config).unwrap();
    let table = store.table("Observations").unwrap();
    assert_eq!(store.row_count(&table).unwrap(), 3);
    assert_eq!(store.pending_changes().unwrap().len(), 3);
}

#[test]
fn feature_ids_are_not_reused_after_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("survey.mvds");

    let store = LocalStore::create(&path, &seed(), StoreConfig::default()).unwrap();
    let table = store.table("Observations").unwrap();
    store.begin().unwrap();
    add(&store, 1).unwrap();
    add(&store, 2).unwrap();
    store.commit().unwrap();
    let first = store.features(&table).unwrap()[1].id().unwrap();
    store.close().unwrap();

    let store = LocalStore::open(&path).unwrap();
    let table = store.table("Observations").unwrap();
    store.begin().unwrap();
    add(&store, 3).unwrap();
    store.commit().unwrap();
    let ids: Vec<_> = store
        .features(&table)
        .unwrap()
        .iter()
        .filter_map(|f| f.id())
        .collect();
    assert_eq!(ids.len(), 3);
    assert!(ids[2] > first);
}
