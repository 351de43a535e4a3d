//! Pending writes of an open transaction.

use crate::feature::FeatureData;
use crate::log::{LogRecord, Origin};
use crate::types::{FeatureId, GlobalId, SequenceNumber, TableId, TransactionId};
use std::collections::BTreeMap;

/// A buffered row write.
#[derive(Debug, Clone)]
pub(crate) enum PendingWrite {
    /// Full row contents.
    Put {
        global_id: GlobalId,
        data: FeatureData,
        /// The row did not exist before this transaction.
        is_new: bool,
    },
    /// Row removal.
    Delete { global_id: GlobalId },
}

impl PendingWrite {
    pub fn global_id(&self) -> GlobalId {
        match self {
            Self::Put { global_id, .. } | Self::Delete { global_id } => *global_id,
        }
    }
}

/// The batch of edits made since `begin`.
///
/// Writes to the same row collapse to the row's final state, so commit
/// writes at most one record per row.
#[derive(Debug)]
pub(crate) struct Transaction {
    id: TransactionId,
    origin: Origin,
    writes: BTreeMap<(TableId, FeatureId), PendingWrite>,
}

impl Transaction {
    pub fn new(id: TransactionId, origin: Origin) -> Self {
        Self {
            id,
            origin,
            writes: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn put(
        &mut self,
        table_id: TableId,
        feature_id: FeatureId,
        global_id: GlobalId,
        data: FeatureData,
        is_new: bool,
    ) {
        let key = (table_id, feature_id);
        let is_new = is_new
            || matches!(self.writes.get(&key), Some(PendingWrite::Put { is_new: true, .. }));
        self.writes.insert(
            key,
            PendingWrite::Put {
                global_id,
                data,
                is_new,
            },
        );
    }

    pub fn delete(&mut self, table_id: TableId, feature_id: FeatureId, global_id: GlobalId) {
        let key = (table_id, feature_id);
        if matches!(self.writes.get(&key), Some(PendingWrite::Put { is_new: true, .. })) {
            self.writes.remove(&key);
        } else {
            self.writes.insert(key, PendingWrite::Delete { global_id });
        }
    }

    pub fn get(&self, table_id: TableId, feature_id: FeatureId) -> Option<&PendingWrite> {
        self.writes.get(&(table_id, feature_id))
    }

    pub fn writes(&self) -> impl Iterator<Item = (&(TableId, FeatureId), &PendingWrite)> {
        self.writes.iter()
    }

    pub fn writes_for(&self, table_id: TableId) -> impl Iterator<Item = (FeatureId, &PendingWrite)> {
        self.writes
            .range((table_id, FeatureId::new(0))..=(table_id, FeatureId::new(u64::MAX)))
            .map(|((_, feature_id), write)| (*feature_id, write))
    }

    pub fn find_global(&self, global_id: GlobalId) -> Option<((TableId, FeatureId), &PendingWrite)> {
        self.writes
            .iter()
            .find(|(_, w)| w.global_id() == global_id)
            .map(|(key, w)| (*key, w))
    }

    /// Builds `Begin, (Put | Delete)*, Commit` for this batch.
    pub fn to_records(&self, sequence: SequenceNumber) -> Vec<LogRecord> {
        let txid = self.id;
        let mut records = Vec::with_capacity(self.writes.len() + 2);
        records.push(LogRecord::Begin {
            txid,
            origin: self.origin,
        });
        for ((table_id, feature_id), write) in &self.writes {
            records.push(match write {
                PendingWrite::Put {
                    global_id, data, ..
                } => LogRecord::Put {
                    txid,
                    table_id: *table_id,
                    feature_id: *feature_id,
                    global_id: *global_id,
                    data: data.clone(),
                },
                PendingWrite::Delete { global_id } => LogRecord::Delete {
                    txid,
                    table_id: *table_id,
                    feature_id: *feature_id,
                    global_id: *global_id,
                },
            });
        }
        records.push(LogRecord::Commit { txid, sequence });
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Geometry;
    use crate::log::LogRecordType;

    fn txn() -> Transaction {
        Transaction::new(TransactionId::new(1), Origin::Local)
    }

    fn data(x: f64) -> FeatureData {
        FeatureData::with_geometry(Geometry::point(x, x))
    }

    #[test]
    fn added_then_deleted_row_vanishes() {
        let mut txn = txn();
        let g = GlobalId::new();
        txn.put(TableId::new(0), FeatureId::new(1), g, data(1.0), true);
        txn.put(TableId::new(0), FeatureId::new(1), g, data(2.0), false);
        txn.delete(TableId::new(0), FeatureId::new(1), g);
        assert!(txn.is_empty());
    }

    #[test]
    fn deleting_existing_row_is_recorded() {
        let mut txn = txn();
        let g = GlobalId::new();
        txn.put(TableId::new(0), FeatureId::new(5), g, data(1.0), false);
        txn.delete(TableId::new(0), FeatureId::new(5), g);
        assert!(matches!(
            txn.get(TableId::new(0), FeatureId::new(5)),
            Some(PendingWrite::Delete { .. })
        ));
    }

    #[test]
    fn writes_for_filters_by_table() {
        let mut txn = txn();
        txn.put(TableId::new(0), FeatureId::new(1), GlobalId::new(), data(1.0), true);
        txn.put(TableId::new(1), FeatureId::new(2), GlobalId::new(), data(1.0), true);
        txn.put(TableId::new(1), FeatureId::new(3), GlobalId::new(), data(1.0), true);
        let ids: Vec<_> = txn.writes_for(TableId::new(1)).map(|(id, _)| id).collect();
        assert_eq!(ids, vec![FeatureId::new(2), FeatureId::new(3)]);
        assert_eq!(txn.len(), 3);
    }

    #[test]
    fn records_frame_the_batch() {
        let mut txn = txn();
        let g = GlobalId::new();
        txn.put(TableId::new(0), FeatureId::new(1), g, data(1.0), true);
        assert_eq!(txn.find_global(g).map(|(key, _)| key.1), Some(FeatureId::new(1)));

        let types: Vec<_> = txn
            .to_records(SequenceNumber::new(4))
            .iter()
            .map(LogRecord::record_type)
            .collect();
        assert_eq!(
            types,
            vec![LogRecordType::Begin, LogRecordType::Put, LogRecordType::Commit]
        );
    }
}
