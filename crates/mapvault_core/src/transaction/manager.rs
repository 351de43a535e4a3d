//! Transaction manager.

use crate::error::{CoreError, CoreResult};
use crate::events::{EventFeed, StoreEvent};
use crate::index::{BatchOp, DatasetIndex};
use crate::log::{DatasetLog, LogRecord, Origin, RecordLocation};
use crate::replica::SyncPoint;
use crate::transaction::state::{PendingWrite, Transaction};
use crate::types::SequenceNumber;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Held by a running synchronization.
///
/// While a lease exists, `begin()` and direct edits fail with
/// [`CoreError::Conflict`]. Dropping the lease ends the sync window.
#[derive(Debug)]
pub struct SyncLease {
    flag: Arc<AtomicBool>,
}

impl Drop for SyncLease {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Enforces the NONE/ACTIVE transaction state machine of a dataset.
///
/// At most one transaction is active at a time. `begin` while active,
/// and `commit` or `rollback` while none is active, are no-ops.
///
/// When `require_transactions` is off, edits made outside a transaction are
/// committed immediately as single-edit batches.
pub struct TransactionManager {
    log: Arc<DatasetLog>,
    index: Arc<RwLock<DatasetIndex>>,
    events: Arc<EventFeed<StoreEvent>>,
    active: Mutex<Option<Transaction>>,
    require_transactions: AtomicBool,
    sync_in_flight: Arc<AtomicBool>,
    sync_on_commit: bool,
    closed: AtomicBool,
}

impl TransactionManager {
    pub(crate) fn new(
        log: Arc<DatasetLog>,
        index: Arc<RwLock<DatasetIndex>>,
        events: Arc<EventFeed<StoreEvent>>,
        require_transactions: bool,
        sync_on_commit: bool,
    ) -> Self {
        Self {
            log,
            index,
            events,
            active: Mutex::new(None),
            require_transactions: AtomicBool::new(require_transactions),
            sync_in_flight: Arc::new(AtomicBool::new(false)),
            sync_on_commit,
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn ensure_open(&self) -> CoreResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(CoreError::Closed)
        } else {
            Ok(())
        }
    }

    fn ensure_not_syncing(&self) -> CoreResult<()> {
        if self.sync_in_flight.load(Ordering::SeqCst) {
            Err(CoreError::conflict("a synchronization is in progress"))
        } else {
            Ok(())
        }
    }

    /// Returns true while a transaction is active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Returns true while a synchronization holds the dataset.
    #[must_use]
    pub fn is_syncing(&self) -> bool {
        self.sync_in_flight.load(Ordering::SeqCst)
    }

    /// Returns the current transaction policy.
    #[must_use]
    pub fn require_transactions(&self) -> bool {
        self.require_transactions.load(Ordering::SeqCst)
    }

    /// Changes the transaction policy.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Policy`] when turning the requirement off while a
    /// transaction is active.
    pub fn set_require_transactions(&self, value: bool) -> CoreResult<()> {
        self.ensure_open()?;
        let active = self.active.lock();
        if !value && active.is_some() && self.require_transactions() {
            return Err(CoreError::policy(
                "cannot stop requiring transactions while one is active",
            ));
        }
        self.require_transactions.store(value, Ordering::SeqCst);
        Ok(())
    }

    /// Starts a transaction. Returns `Ok(false)` if one is already active.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Conflict`] while a synchronization is running.
    pub fn begin(&self) -> CoreResult<bool> {
        self.ensure_open()?;
        let mut active = self.active.lock();
        self.ensure_not_syncing()?;
        if active.is_some() {
            return Ok(false);
        }
        let txid = self.index.write().allocate_txid();
        *active = Some(Transaction::new(txid, Origin::Local));
        drop(active);

        debug!(%txid, "transaction started");
        self.events.emit(StoreEvent::TransactionStatusChanged {
            in_transaction: true,
        });
        Ok(true)
    }

    /// Durably commits the active transaction.
    ///
    /// Returns the sequence number of the commit, or `Ok(None)` when no
    /// transaction is active. A transaction with no edits commits without
    /// touching the file and reports the last committed sequence.
    ///
    /// # Errors
    ///
    /// On a write failure the file is cut back to its previous size and the
    /// transaction stays active, so it can be retried or rolled back. If the
    /// file cannot be cut back, the store closes and the transaction is
    /// dropped; whether the batch survives is decided by the next open.
    pub fn commit(&self) -> CoreResult<Option<SequenceNumber>> {
        self.ensure_open()?;
        let mut active = self.active.lock();
        let Some(txn) = active.as_ref() else {
            return Ok(None);
        };

        let sequence = if txn.is_empty() {
            self.index.read().last_sequence
        } else {
            let mut index = self.index.write();
            match self.persist(&mut index, Some(txn), None) {
                Ok(sequence) => sequence,
                Err(e) => {
                    if self.closed.load(Ordering::SeqCst) {
                        *active = None;
                        drop(active);
                        self.events.emit(StoreEvent::TransactionStatusChanged {
                            in_transaction: false,
                        });
                    }
                    return Err(e);
                }
            }
        };
        let txid = txn.id();
        let writes = txn.len();
        *active = None;
        drop(active);

        debug!(%txid, %sequence, writes, "transaction committed");
        self.events.emit(StoreEvent::TransactionStatusChanged {
            in_transaction: false,
        });
        Ok(Some(sequence))
    }

    /// Discards the active transaction. Returns `Ok(false)` if none was active.
    pub fn rollback(&self) -> CoreResult<bool> {
        self.ensure_open()?;
        let Some(txn) = self.active.lock().take() else {
            return Ok(false);
        };

        debug!(txid = %txn.id(), discarded = txn.len(), "transaction rolled back");
        self.events.emit(StoreEvent::TransactionStatusChanged {
            in_transaction: false,
        });
        Ok(true)
    }

    /// Runs an edit against the active transaction, or as its own committed
    /// batch when transactions are not required.
    pub(crate) fn stage<R>(
        &self,
        edit: impl FnOnce(&mut Transaction, &mut DatasetIndex) -> CoreResult<R>,
    ) -> CoreResult<R> {
        self.ensure_open()?;
        let mut active = self.active.lock();
        self.ensure_not_syncing()?;

        if let Some(txn) = active.as_mut() {
            let mut index = self.index.write();
            return edit(txn, &mut index);
        }

        if self.require_transactions() {
            return Err(CoreError::policy(
                "edits require an active transaction; call begin() first",
            ));
        }

        let mut index = self.index.write();
        let mut txn = Transaction::new(index.allocate_txid(), Origin::Local);
        let result = edit(&mut txn, &mut index)?;
        if !txn.is_empty() {
            let sequence = self.persist(&mut index, Some(&txn), None)?;
            debug!(txid = %txn.id(), %sequence, "edit auto-committed");
        }
        Ok(result)
    }

    /// Runs a read against committed state and the active transaction.
    pub(crate) fn read<R>(
        &self,
        view: impl FnOnce(Option<&Transaction>, &DatasetIndex) -> R,
    ) -> CoreResult<R> {
        self.ensure_open()?;
        let active = self.active.lock();
        let index = self.index.read();
        Ok(view(active.as_ref(), &index))
    }

    /// Takes the sync lease.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Policy`] while a transaction is active and
    /// [`CoreError::Conflict`] if another synchronization holds the lease.
    pub fn begin_sync(&self) -> CoreResult<SyncLease> {
        self.ensure_open()?;
        let active = self.active.lock();
        if active.is_some() {
            return Err(CoreError::policy(
                "cannot synchronize while a transaction is active",
            ));
        }
        self.sync_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| CoreError::conflict("a synchronization is already running"))?;
        Ok(SyncLease {
            flag: Arc::clone(&self.sync_in_flight),
        })
    }

    /// Writes a remote batch and a sync marker as one durable append.
    pub(crate) fn commit_remote(
        &self,
        lease: &SyncLease,
        build: impl FnOnce(&mut Transaction, &mut DatasetIndex) -> CoreResult<()>,
        point: SyncPoint,
        clears_local: bool,
    ) -> CoreResult<usize> {
        self.ensure_open()?;
        if !Arc::ptr_eq(&lease.flag, &self.sync_in_flight) {
            return Err(CoreError::conflict("sync lease belongs to another dataset"));
        }
        let _active = self.active.lock();
        let mut index = self.index.write();
        let mut txn = Transaction::new(index.allocate_txid(), Origin::Remote);
        build(&mut txn, &mut index)?;
        let applied = txn.len();
        let batch = if txn.is_empty() { None } else { Some(&txn) };
        self.persist(&mut index, batch, Some((point, clears_local)))?;
        Ok(applied)
    }

    /// Appends a batch and/or sync marker, makes it durable, then folds it
    /// into the index.
    fn persist(
        &self,
        index: &mut DatasetIndex,
        txn: Option<&Transaction>,
        marker: Option<(SyncPoint, bool)>,
    ) -> CoreResult<SequenceNumber> {
        let mut sequence = index.last_sequence;
        let mut records = Vec::new();
        if let Some(txn) = txn {
            sequence = sequence.next();
            records.extend(txn.to_records(sequence));
        }
        if let Some((point, clears_local)) = marker {
            sequence = sequence.next();
            records.push(LogRecord::SyncMarker {
                sequence,
                point,
                clears_local,
            });
        }

        let locations = match self.log.append_batch(&records) {
            Ok(locations) => locations,
            Err(e) => {
                if self.log.is_closed() {
                    self.closed.store(true, Ordering::SeqCst);
                }
                return Err(e);
            }
        };
        let durable = if self.sync_on_commit {
            self.log.sync()
        } else {
            self.log.flush()
        };
        if let Err(e) = durable {
            if let Some(first) = locations.first() {
                warn!(offset = first.offset, error = %e, "commit not durable, cutting it back");
                if let Err(cut) = self.log.truncate(first.offset) {
                    error!(offset = first.offset, error = %cut, "commit could not be cut back, closing dataset");
                    self.log.abandon();
                    self.closed.store(true, Ordering::SeqCst);
                    return Err(cut);
                }
            }
            return Err(e);
        }

        if let Some(txn) = txn {
            // locations[0] is Begin; row records follow in write order.
            let ops = batch_ops(txn, &locations[1..]);
            index.apply_batch(txn.origin(), &ops);
        }
        if let Some((point, clears_local)) = marker {
            if clears_local {
                index.clear_delta();
            }
            index.last_sync = Some(point);
        }
        index.last_sequence = sequence;
        Ok(sequence)
    }

    /// Marks the manager closed and discards any active transaction.
    pub(crate) fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(txn) = self.active.lock().take() {
            debug!(txid = %txn.id(), "discarding open transaction on close");
            self.events.emit(StoreEvent::TransactionStatusChanged {
                in_transaction: false,
            });
        }
    }
}

fn batch_ops(txn: &Transaction, locations: &[RecordLocation]) -> Vec<BatchOp> {
    txn.writes()
        .zip(locations)
        .map(|(((table_id, feature_id), write), location)| match write {
            PendingWrite::Put { global_id, .. } => BatchOp::Put {
                table_id: *table_id,
                feature_id: *feature_id,
                global_id: *global_id,
                location: *location,
            },
            PendingWrite::Delete { global_id } => BatchOp::Delete {
                table_id: *table_id,
                feature_id: *feature_id,
                global_id: *global_id,
            },
        })
        .collect()
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("active", &self.is_active())
            .field("require_transactions", &self.require_transactions())
            .field("syncing", &self.is_syncing())
            .finish_non_exhaustive()
    }
}
