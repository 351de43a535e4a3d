//! Sequential record iterator used by recovery and inspection.

use crate::error::CoreResult;
use crate::log::record::{decode_frame, FrameHeader, LogRecord, FRAME_HEADER_SIZE};
use crate::log::RecordLocation;
use mapvault_storage::StorageBackend;
use parking_lot::MappedMutexGuard;

/// Iterates over the records of a dataset log from the start.
///
/// A header cut short by the end of the file, or a checksummed header whose
/// frame runs past it, ends iteration cleanly: it is the torn tail of an
/// interrupted append. Bad magic, a header or frame checksum mismatch, an
/// unknown type or an oversized length yield an error and end iteration.
pub struct LogIterator<'a> {
    backend: MappedMutexGuard<'a, Box<dyn StorageBackend>>,
    size: u64,
    offset: u64,
    finished: bool,
}

impl<'a> LogIterator<'a> {
    pub(crate) fn new(backend: MappedMutexGuard<'a, Box<dyn StorageBackend>>) -> CoreResult<Self> {
        let size = backend.size()?;
        Ok(Self {
            backend,
            size,
            offset: 0,
            finished: false,
        })
    }

    /// Offset just past the last record returned.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.offset
    }

    /// Total bytes in the log.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    fn read_next(&mut self) -> CoreResult<Option<(RecordLocation, LogRecord)>> {
        let remaining = self.size - self.offset;
        if remaining < FRAME_HEADER_SIZE as u64 {
            return Ok(None);
        }

        let header_bytes = self.backend.read_at(self.offset, FRAME_HEADER_SIZE)?;
        let header = FrameHeader::parse(&header_bytes, self.offset)?;
        let frame_len = header.frame_len();
        if (frame_len as u64) > remaining {
            return Ok(None);
        }

        let frame = self.backend.read_at(self.offset, frame_len)?;
        let record = decode_frame(&frame, self.offset)?;
        let location = RecordLocation {
            offset: self.offset,
            len: frame_len,
        };
        self.offset += frame_len as u64;
        Ok(Some((location, record)))
    }
}

impl Iterator for LogIterator<'_> {
    type Item = CoreResult<(RecordLocation, LogRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.read_next() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}
