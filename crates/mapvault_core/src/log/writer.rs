//! Dataset log writer and random-access reader.

use crate::error::{CoreError, CoreResult};
use crate::log::iterator::LogIterator;
use crate::log::record::{decode_frame, LogRecord};
use mapvault_storage::StorageBackend;
use parking_lot::{Mutex, MutexGuard};
use tracing::error;

/// Byte range of one record in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLocation {
    /// Offset of the frame.
    pub offset: u64,
    /// Frame length including header and checksum.
    pub len: usize,
}

impl RecordLocation {
    /// Offset just past this record.
    #[must_use]
    pub fn end(&self) -> u64 {
        self.offset + self.len as u64
    }
}

/// Append-only record log over a storage backend.
///
/// The log owns the backend. Closing it drops the backend, which releases
/// the dataset file and its lock; every later call fails with
/// [`CoreError::Closed`].
pub struct DatasetLog {
    backend: Mutex<Option<Box<dyn StorageBackend>>>,
}

impl DatasetLog {
    /// Creates a log over `backend`.
    pub fn new(backend: Box<dyn StorageBackend>) -> Self {
        Self {
            backend: Mutex::new(Some(backend)),
        }
    }

    fn lock(&self) -> CoreResult<parking_lot::MappedMutexGuard<'_, Box<dyn StorageBackend>>> {
        MutexGuard::try_map(self.backend.lock(), Option::as_mut).map_err(|_| CoreError::Closed)
    }

    /// Appends one record.
    pub fn append(&self, record: &LogRecord) -> CoreResult<RecordLocation> {
        let frame = record.encode_frame()?;
        let offset = self.lock()?.append(&frame)?;
        Ok(RecordLocation {
            offset,
            len: frame.len(),
        })
    }

    /// Appends records as one contiguous write.
    ///
    /// Either every frame reaches the backend or, on error, the log is cut
    /// back to its previous size. If the cut fails as well, the log is
    /// abandoned and later calls fail with [`CoreError::Closed`].
    pub fn append_batch(&self, records: &[LogRecord]) -> CoreResult<Vec<RecordLocation>> {
        let mut buf = Vec::new();
        let mut spans = Vec::with_capacity(records.len());
        for record in records {
            let frame = record.encode_frame()?;
            spans.push((buf.len() as u64, frame.len()));
            buf.extend_from_slice(&frame);
        }

        let mut slot = self.backend.lock();
        let backend = slot.as_mut().ok_or(CoreError::Closed)?;
        let start = backend.size()?;
        let base = match backend.append(&buf) {
            Ok(base) => base,
            Err(e) => {
                if let Err(cut) = backend.truncate(start) {
                    error!(start, error = %cut, "failed append could not be cut back");
                    *slot = None;
                    return Err(cut.into());
                }
                return Err(e.into());
            }
        };

        Ok(spans
            .into_iter()
            .map(|(rel, len)| RecordLocation {
                offset: base + rel,
                len,
            })
            .collect())
    }

    /// Reads and verifies the record at `location`.
    pub fn read(&self, location: RecordLocation) -> CoreResult<LogRecord> {
        let frame = self.lock()?.read_at(location.offset, location.len)?;
        decode_frame(&frame, location.offset)
    }

    /// Hands buffered writes to the OS.
    pub fn flush(&self) -> CoreResult<()> {
        self.lock()?.flush()?;
        Ok(())
    }

    /// Forces the log to durable storage.
    pub fn sync(&self) -> CoreResult<()> {
        let mut backend = self.lock()?;
        backend.flush()?;
        backend.sync()?;
        Ok(())
    }

    /// Returns the log size in bytes.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.lock()?.size()?)
    }

    /// Cuts the log back to `len` bytes.
    pub fn truncate(&self, len: u64) -> CoreResult<()> {
        self.lock()?.truncate(len)?;
        Ok(())
    }

    /// Drops the backend without flushing. The log behaves as closed.
    pub(crate) fn abandon(&self) {
        self.backend.lock().take();
    }

    /// Iterates over all records from the start.
    ///
    /// The log stays locked while the iterator lives.
    pub fn iter(&self) -> CoreResult<LogIterator<'_>> {
        LogIterator::new(self.lock()?)
    }

    /// Flushes and drops the backend. Returns false if already closed.
    pub fn close(&self) -> CoreResult<bool> {
        let mut slot = self.backend.lock();
        match slot.take() {
            Some(mut backend) => {
                backend.flush()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Returns true once the log has been closed or abandoned.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.backend.lock().is_none()
    }
}

impl std::fmt::Debug for DatasetLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatasetLog")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::record::{LogRecordType, Origin};
    use crate::types::{SequenceNumber, TransactionId};
    use mapvault_storage::{InMemoryBackend, StorageError, StorageResult};

    fn begin(txid: u64) -> LogRecord {
        LogRecord::Begin {
            txid: TransactionId::new(txid),
            origin: Origin::Local,
        }
    }

    fn commit(txid: u64) -> LogRecord {
        LogRecord::Commit {
            txid: TransactionId::new(txid),
            sequence: SequenceNumber::new(txid),
        }
    }

    #[test]
    fn batch_locations_are_contiguous() {
        let log = DatasetLog::new(Box::new(InMemoryBackend::new()));
        let locations = log.append_batch(&[begin(1), commit(1)]).unwrap();
        assert_eq!(locations[0].offset, 0);
        assert_eq!(locations[1].offset, locations[0].end());
        assert_eq!(log.size().unwrap(), locations[1].end());
        assert_eq!(log.read(locations[1]).unwrap(), commit(1));
    }

    /// Keeps half of every append, then reports failure.
    struct HalfWrites {
        inner: InMemoryBackend,
        truncate_fails: bool,
    }

    impl StorageBackend for HalfWrites {
        fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
            self.inner.read_at(offset, len)
        }

        fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
            self.inner.append(&data[..data.len() / 2])?;
            Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )))
        }

        fn flush(&mut self) -> StorageResult<()> {
            self.inner.flush()
        }

        fn size(&self) -> StorageResult<u64> {
            self.inner.size()
        }

        fn sync(&mut self) -> StorageResult<()> {
            self.inner.sync()
        }

        fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
            if self.truncate_fails {
                return Err(StorageError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "read-only",
                )));
            }
            self.inner.truncate(new_size)
        }
    }

    #[test]
    fn failed_append_is_cut_back() {
        let inner = InMemoryBackend::new();
        let log = DatasetLog::new(Box::new(HalfWrites {
            inner: inner.handle(),
            truncate_fails: false,
        }));
        assert!(log.append_batch(&[begin(1), commit(1)]).is_err());
        assert!(inner.data().is_empty());
        assert!(!log.is_closed());
    }

    #[test]
    fn failed_cut_back_abandons_the_log() {
        let inner = InMemoryBackend::new();
        let log = DatasetLog::new(Box::new(HalfWrites {
            inner: inner.handle(),
            truncate_fails: true,
        }));
        assert!(matches!(
            log.append_batch(&[begin(1), commit(1)]),
            Err(CoreError::Storage(_))
        ));
        assert!(log.is_closed());
        assert!(matches!(
            log.append_batch(&[begin(2), commit(2)]),
            Err(CoreError::Closed)
        ));
        assert!(!log.close().unwrap());
    }

    #[test]
    fn iterator_stops_at_torn_tail() {
        let backend = InMemoryBackend::new();
        let log = DatasetLog::new(Box::new(backend.handle()));
        log.append_batch(&[begin(1), commit(1)]).unwrap();
        let clean = log.size().unwrap();
        let torn = commit(2).encode_frame().unwrap();
        backend.replace([backend.data(), torn[..torn.len() - 3].to_vec()].concat());

        let log = DatasetLog::new(Box::new(backend));
        let mut iter = log.iter().unwrap();
        let types: Vec<_> = iter
            .by_ref()
            .map(|r| r.unwrap().1.record_type())
            .collect();
        assert_eq!(types, vec![LogRecordType::Begin, LogRecordType::Commit]);
        assert_eq!(iter.position(), clean);
        assert!(iter.size() > clean);
    }

    #[test]
    fn damaged_length_mid_log_is_not_a_torn_tail() {
        let backend = InMemoryBackend::new();
        let log = DatasetLog::new(Box::new(backend.handle()));
        let first = log.append(&begin(1)).unwrap();
        log.append(&commit(1)).unwrap();

        let mut bytes = backend.data();
        let at = first.offset as usize + 7;
        bytes[at..at + 4].copy_from_slice(&1_000_000u32.to_le_bytes());
        backend.replace(bytes);

        let results: Vec<_> = log.iter().unwrap().collect();
        assert_eq!(results.len(), 1);
        assert!(matches!(
            results[0],
            Err(CoreError::ChecksumMismatch { offset: 0, .. })
        ));
    }

    #[test]
    fn iterator_reports_checksum_damage() {
        let backend = InMemoryBackend::new();
        let log = DatasetLog::new(Box::new(backend.handle()));
        log.append(&begin(1)).unwrap();
        let second = log.append(&commit(1)).unwrap();

        let mut bytes = backend.data();
        bytes[second.offset as usize + 12] ^= 0xFF;
        backend.replace(bytes);

        let results: Vec<_> = log.iter().unwrap().collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(
            results[1],
            Err(CoreError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn closed_log_refuses_access() {
        let log = DatasetLog::new(Box::new(InMemoryBackend::new()));
        assert!(log.close().unwrap());
        assert!(!log.close().unwrap());
        assert!(log.is_closed());
        assert!(matches!(log.append(&begin(1)), Err(CoreError::Closed)));
        assert!(matches!(log.size(), Err(CoreError::Closed)));
    }
}
