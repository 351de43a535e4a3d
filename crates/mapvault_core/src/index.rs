//! In-memory index of a dataset log.
//!
//! The index holds record locations, not row contents. Rows and table
//! schemas are read back from the log when asked for.

use crate::log::{Origin, RecordLocation};
use crate::replica::{ReplicaInfo, SyncPoint};
use crate::schema::TableSchema;
use crate::types::{FeatureId, GlobalId, SequenceNumber, TableId, TransactionId};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

pub(crate) struct TableSlot {
    pub id: TableId,
    pub name: String,
    pub location: RecordLocation,
    pub schema: RwLock<Option<Arc<TableSchema>>>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct RowEntry {
    pub global_id: GlobalId,
    pub location: RecordLocation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeltaKind {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DeltaEntry {
    pub global_id: GlobalId,
    pub kind: DeltaKind,
}

/// One row operation of a committed batch.
#[derive(Debug, Clone, Copy)]
pub(crate) enum BatchOp {
    Put {
        table_id: TableId,
        feature_id: FeatureId,
        global_id: GlobalId,
        location: RecordLocation,
    },
    Delete {
        table_id: TableId,
        feature_id: FeatureId,
        global_id: GlobalId,
    },
}

pub(crate) struct DatasetIndex {
    pub replica: ReplicaInfo,
    pub tables: Vec<TableSlot>,
    rows: HashMap<TableId, BTreeMap<FeatureId, RowEntry>>,
    by_global: HashMap<GlobalId, (TableId, FeatureId)>,
    delta: BTreeMap<(TableId, FeatureId), DeltaEntry>,
    pub last_sync: Option<SyncPoint>,
    pub next_feature_id: u64,
    pub next_txid: u64,
    pub last_sequence: SequenceNumber,
}

impl DatasetIndex {
    pub fn new(replica: ReplicaInfo) -> Self {
        Self {
            replica,
            tables: Vec::new(),
            rows: HashMap::new(),
            by_global: HashMap::new(),
            delta: BTreeMap::new(),
            last_sync: None,
            next_feature_id: 1,
            next_txid: 1,
            last_sequence: SequenceNumber::new(0),
        }
    }

    pub fn add_table(&mut self, id: TableId, name: String, location: RecordLocation) {
        self.rows.entry(id).or_default();
        self.tables.push(TableSlot {
            id,
            name,
            location,
            schema: RwLock::new(None),
        });
    }

    pub fn table_by_name(&self, name: &str) -> Option<&TableSlot> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn table_by_id(&self, id: TableId) -> Option<&TableSlot> {
        self.tables.iter().find(|t| t.id == id)
    }

    pub fn row(&self, table_id: TableId, feature_id: FeatureId) -> Option<RowEntry> {
        self.rows.get(&table_id)?.get(&feature_id).copied()
    }

    pub fn rows(&self, table_id: TableId) -> impl Iterator<Item = (FeatureId, RowEntry)> + '_ {
        self.rows
            .get(&table_id)
            .into_iter()
            .flat_map(|rows| rows.iter().map(|(id, entry)| (*id, *entry)))
    }

    pub fn row_count(&self, table_id: TableId) -> usize {
        self.rows.get(&table_id).map_or(0, BTreeMap::len)
    }

    pub fn locate(&self, global_id: GlobalId) -> Option<(TableId, FeatureId)> {
        self.by_global.get(&global_id).copied()
    }

    pub fn delta(&self) -> impl Iterator<Item = ((TableId, FeatureId), DeltaEntry)> + '_ {
        self.delta.iter().map(|(k, v)| (*k, *v))
    }

    pub fn delta_len(&self) -> usize {
        self.delta.len()
    }

    pub fn clear_delta(&mut self) {
        self.delta.clear();
    }

    pub fn allocate_txid(&mut self) -> TransactionId {
        let txid = TransactionId::new(self.next_txid);
        self.next_txid += 1;
        txid
    }

    pub fn allocate_feature_id(&mut self) -> FeatureId {
        let id = FeatureId::new(self.next_feature_id);
        self.next_feature_id += 1;
        id
    }

    /// Applies a committed batch, folding local edits into the delta.
    ///
    /// Remote batches win over pending local edits of the same rows.
    pub fn apply_batch(&mut self, origin: Origin, ops: &[BatchOp]) {
        for op in ops {
            match *op {
                BatchOp::Put {
                    table_id,
                    feature_id,
                    global_id,
                    location,
                } => {
                    let key = (table_id, feature_id);
                    match origin {
                        Origin::Local => {
                            let existed = self.row(table_id, feature_id).is_some();
                            let kind = match self.delta.get(&key).map(|e| e.kind) {
                                Some(DeltaKind::Insert) => DeltaKind::Insert,
                                Some(_) => DeltaKind::Update,
                                None if existed => DeltaKind::Update,
                                None => DeltaKind::Insert,
                            };
                            self.delta.insert(key, DeltaEntry { global_id, kind });
                        }
                        Origin::Remote => {
                            self.delta.remove(&key);
                        }
                    }
                    self.rows
                        .entry(table_id)
                        .or_default()
                        .insert(feature_id, RowEntry { global_id, location });
                    self.by_global.insert(global_id, key);
                    self.next_feature_id = self.next_feature_id.max(feature_id.as_u64() + 1);
                }
                BatchOp::Delete {
                    table_id,
                    feature_id,
                    global_id,
                } => {
                    let key = (table_id, feature_id);
                    match origin {
                        Origin::Local => match self.delta.get(&key).map(|e| e.kind) {
                            Some(DeltaKind::Insert) => {
                                self.delta.remove(&key);
                            }
                            _ => {
                                self.delta.insert(
                                    key,
                                    DeltaEntry {
                                        global_id,
                                        kind: DeltaKind::Delete,
                                    },
                                );
                            }
                        },
                        Origin::Remote => {
                            self.delta.remove(&key);
                        }
                    }
                    if let Some(rows) = self.rows.get_mut(&table_id) {
                        rows.remove(&feature_id);
                    }
                    self.by_global.remove(&global_id);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replica::SyncModel;
    use geo::{coord, Rect};
    use uuid::Uuid;

    fn index() -> DatasetIndex {
        let replica = ReplicaInfo::new(
            Uuid::new_v4(),
            "memory://marine",
            SyncModel::Geodatabase,
            Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 1.0, y: 1.0 }),
            vec![0],
        );
        let mut index = DatasetIndex::new(replica);
        index.add_table(
            TableId::new(0),
            "Birds".to_string(),
            RecordLocation { offset: 0, len: 1 },
        );
        index
    }

    fn put(feature: u64, global_id: GlobalId) -> BatchOp {
        BatchOp::Put {
            table_id: TableId::new(0),
            feature_id: FeatureId::new(feature),
            global_id,
            location: RecordLocation {
                offset: feature * 100,
                len: 50,
            },
        }
    }

    fn delete(feature: u64, global_id: GlobalId) -> BatchOp {
        BatchOp::Delete {
            table_id: TableId::new(0),
            feature_id: FeatureId::new(feature),
            global_id,
        }
    }

    fn kinds(index: &DatasetIndex) -> Vec<DeltaKind> {
        index.delta().map(|(_, e)| e.kind).collect()
    }

    #[test]
    fn insert_then_update_stays_insert() {
        let mut index = index();
        let g = GlobalId::new();
        index.apply_batch(Origin::Local, &[put(1, g)]);
        index.apply_batch(Origin::Local, &[put(1, g)]);
        assert_eq!(kinds(&index), vec![DeltaKind::Insert]);
        assert_eq!(index.row_count(TableId::new(0)), 1);
    }

    #[test]
    fn insert_then_delete_leaves_nothing() {
        let mut index = index();
        let g = GlobalId::new();
        index.apply_batch(Origin::Local, &[put(1, g)]);
        index.apply_batch(Origin::Local, &[delete(1, g)]);
        assert_eq!(index.delta_len(), 0);
        assert_eq!(index.row_count(TableId::new(0)), 0);
        assert!(index.locate(g).is_none());
    }

    #[test]
    fn edits_of_downloaded_rows_are_updates_and_deletes() {
        let mut index = index();
        let a = GlobalId::new();
        let b = GlobalId::new();
        index.apply_batch(Origin::Remote, &[put(1, a), put(2, b)]);
        assert_eq!(index.delta_len(), 0);

        index.apply_batch(Origin::Local, &[put(1, a), delete(2, b)]);
        assert_eq!(kinds(&index), vec![DeltaKind::Update, DeltaKind::Delete]);
    }

    #[test]
    fn remote_change_overrides_local_edit() {
        let mut index = index();
        let a = GlobalId::new();
        index.apply_batch(Origin::Remote, &[put(1, a)]);
        index.apply_batch(Origin::Local, &[put(1, a)]);
        index.apply_batch(Origin::Remote, &[put(1, a)]);
        assert_eq!(index.delta_len(), 0);
    }

    #[test]
    fn feature_ids_advance_past_replayed_rows() {
        let mut index = index();
        index.apply_batch(Origin::Remote, &[put(41, GlobalId::new())]);
        assert_eq!(index.allocate_feature_id(), FeatureId::new(42));
    }
}
