//! Rebuilding the index from the dataset log on open.

use crate::error::{CoreError, CoreResult};
use crate::index::{BatchOp, DatasetIndex};
use crate::log::{DatasetLog, LogRecord, Origin};
use crate::types::TransactionId;
use tracing::{debug, warn};

struct OpenBatch {
    txid: TransactionId,
    origin: Origin,
    ops: Vec<BatchOp>,
}

/// Outcome of recovery.
pub(crate) struct Recovered {
    pub index: DatasetIndex,
    pub truncated_bytes: u64,
}

/// Replays the committed batches of `log` and cuts off any torn tail.
pub(crate) fn recover(log: &DatasetLog) -> CoreResult<Recovered> {
    let mut iter = log.iter()?;

    let (header_location, replica) = match iter.next() {
        Some(Ok((location, LogRecord::Header(replica)))) => (location, replica),
        Some(Ok((_, other))) => {
            return Err(CoreError::corrupted(format!(
                "dataset starts with {:?}, expected a header",
                other.record_type()
            )))
        }
        Some(Err(e)) => return Err(e),
        None => return Err(CoreError::corrupted("dataset has no header")),
    };

    let mut index = DatasetIndex::new(replica);
    let mut clean_end = header_location.end();
    let mut open: Option<OpenBatch> = None;
    let mut batches = 0usize;

    for item in iter.by_ref() {
        let (location, record) = item?;
        match record {
            LogRecord::Header(_) => {
                return Err(CoreError::corrupted(format!(
                    "second header at offset {}",
                    location.offset
                )));
            }
            LogRecord::TableDef { table_id, schema } => {
                if open.is_some() || index.table_by_id(table_id).is_some() {
                    return Err(CoreError::corrupted(format!(
                        "misplaced definition of {table_id} at offset {}",
                        location.offset
                    )));
                }
                index.add_table(table_id, schema.name, location);
                clean_end = location.end();
            }
            LogRecord::Begin { txid, origin } => {
                if let Some(batch) = &open {
                    return Err(CoreError::corrupted(format!(
                        "{txid} begins inside uncommitted {}",
                        batch.txid
                    )));
                }
                index.next_txid = index.next_txid.max(txid.as_u64() + 1);
                open = Some(OpenBatch {
                    txid,
                    origin,
                    ops: Vec::new(),
                });
            }
            LogRecord::Put {
                txid,
                table_id,
                feature_id,
                global_id,
                ..
            } => {
                let batch = batch_for(&mut open, txid, location.offset)?;
                if index.table_by_id(table_id).is_none() {
                    return Err(CoreError::corrupted(format!(
                        "row {feature_id} refers to unknown {table_id}"
                    )));
                }
                batch.ops.push(BatchOp::Put {
                    table_id,
                    feature_id,
                    global_id,
                    location,
                });
            }
            LogRecord::Delete {
                txid,
                table_id,
                feature_id,
                global_id,
            } => {
                let batch = batch_for(&mut open, txid, location.offset)?;
                batch.ops.push(BatchOp::Delete {
                    table_id,
                    feature_id,
                    global_id,
                });
            }
            LogRecord::Commit { txid, sequence } => {
                batch_for(&mut open, txid, location.offset)?;
                if let Some(batch) = open.take() {
                    index.apply_batch(batch.origin, &batch.ops);
                }
                index.last_sequence = sequence;
                clean_end = location.end();
                batches += 1;
            }
            LogRecord::SyncMarker {
                sequence,
                point,
                clears_local,
            } => {
                if open.is_some() {
                    return Err(CoreError::corrupted(format!(
                        "sync marker inside a batch at offset {}",
                        location.offset
                    )));
                }
                if clears_local {
                    index.clear_delta();
                }
                index.last_sync = Some(point);
                index.last_sequence = sequence;
                clean_end = location.end();
            }
        }
    }

    let size = iter.size();
    drop(iter);

    let truncated_bytes = size - clean_end;
    if truncated_bytes > 0 {
        warn!(
            clean_end,
            truncated_bytes,
            uncommitted = open.is_some(),
            "dropping torn tail of dataset log"
        );
        log.truncate(clean_end)?;
    }

    debug!(
        batches,
        tables = index.tables.len(),
        pending = index.delta_len(),
        "dataset log replayed"
    );
    Ok(Recovered {
        index,
        truncated_bytes,
    })
}

fn batch_for(
    open: &mut Option<OpenBatch>,
    txid: TransactionId,
    offset: u64,
) -> CoreResult<&mut OpenBatch> {
    match open {
        Some(batch) if batch.txid == txid => Ok(batch),
        _ => Err(CoreError::corrupted(format!(
            "record of {txid} at offset {offset} is outside its batch"
        ))),
    }
}
