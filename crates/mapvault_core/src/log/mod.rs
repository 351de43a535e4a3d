//! The dataset log: one append-only file holding a whole dataset.
//!
//! ## Record Format
//!
//! ```text
//! | magic (4) | version (2) | type (1) | length (4) | header crc32 (4) | payload (N) | crc32 (4) |
//! ```
//!
//! The header checksum covers the first 11 bytes, so a damaged length is
//! caught before it is used. The trailing checksum covers everything before
//! it.
//!
//! Payloads are CBOR. A dataset starts with a `Header` record and its
//! `TableDef` records, followed by batches of the form
//! `Begin, (Put | Delete)*, Commit` and occasional `SyncMarker` records.
//!
//! ## Recovery Policy
//!
//! A record whose verified header points past the end of the file is a torn
//! tail and ends the scan, as does a header cut short by the end of the file.
//! A batch without its `Commit` is discarded. Both are truncated away when the
//! dataset is opened.
//!
//! Bad magic, an unknown record type, an unsupported version, a declared
//! length above [`MAX_PAYLOAD_SIZE`] or a checksum mismatch mean the file is
//! damaged. Opening fails rather than guessing.

mod iterator;
mod record;
mod writer;

pub use iterator::LogIterator;
pub use record::{
    compute_crc32, LogRecord, LogRecordType, Origin, LOG_MAGIC, LOG_VERSION, MAX_PAYLOAD_SIZE,
};
pub use writer::{DatasetLog, RecordLocation};
