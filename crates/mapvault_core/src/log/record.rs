//! Log record types and framing.

use crate::error::{CoreError, CoreResult};
use crate::feature::FeatureData;
use crate::replica::{ReplicaInfo, SyncPoint};
use crate::schema::TableSchema;
use crate::types::{FeatureId, GlobalId, SequenceNumber, TableId, TransactionId};
use serde::{Deserialize, Serialize};

/// Magic bytes opening every record.
pub const LOG_MAGIC: [u8; 4] = *b"MVDL";

/// Current record format version.
pub const LOG_VERSION: u16 = 1;

/// magic (4) + version (2) + type (1) + length (4)
const FRAME_PREFIX_SIZE: usize = 11;

/// Prefix plus its own crc32 (4).
pub(crate) const FRAME_HEADER_SIZE: usize = FRAME_PREFIX_SIZE + CRC_SIZE;

/// Largest payload a frame may declare.
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024 * 1024;

pub(crate) const CRC_SIZE: usize = 4;

/// Type byte of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LogRecordType {
    /// Dataset header with replica metadata.
    Header = 1,
    /// Table definition.
    TableDef = 2,
    /// Start of a batch.
    Begin = 3,
    /// Insert or replace a row.
    Put = 4,
    /// Remove a row.
    Delete = 5,
    /// End of a batch.
    Commit = 6,
    /// A completed synchronization.
    SyncMarker = 7,
}

impl LogRecordType {
    /// Converts a byte to a record type.
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Header),
            2 => Some(Self::TableDef),
            3 => Some(Self::Begin),
            4 => Some(Self::Put),
            5 => Some(Self::Delete),
            6 => Some(Self::Commit),
            7 => Some(Self::SyncMarker),
            _ => None,
        }
    }

    /// Converts the record type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Where a batch of edits came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Origin {
    /// Edits made on this device. They join the local delta.
    Local,
    /// Edits downloaded from the remote source.
    Remote,
}

/// A record in the dataset log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogRecord {
    /// First record of every dataset.
    Header(ReplicaInfo),

    /// Defines a table. Written only when the dataset is materialized.
    TableDef {
        /// Table id.
        table_id: TableId,
        /// Table definition.
        schema: TableSchema,
    },

    /// Opens a batch.
    Begin {
        /// Transaction id.
        txid: TransactionId,
        /// Origin of the batch.
        origin: Origin,
    },

    /// Writes the full row for a feature.
    Put {
        /// Transaction id.
        txid: TransactionId,
        /// Table holding the row.
        table_id: TableId,
        /// Local row id.
        feature_id: FeatureId,
        /// Global row id.
        global_id: GlobalId,
        /// Row contents.
        data: FeatureData,
    },

    /// Removes a feature.
    Delete {
        /// Transaction id.
        txid: TransactionId,
        /// Table holding the row.
        table_id: TableId,
        /// Local row id.
        feature_id: FeatureId,
        /// Global row id.
        global_id: GlobalId,
    },

    /// Closes a batch. Only batches with a commit survive recovery.
    Commit {
        /// Transaction id.
        txid: TransactionId,
        /// Sequence number of the batch.
        sequence: SequenceNumber,
    },

    /// Records a completed synchronization.
    SyncMarker {
        /// Sequence number of the sync.
        sequence: SequenceNumber,
        /// Server generation and time.
        point: SyncPoint,
        /// Whether the local delta was uploaded and is cleared.
        clears_local: bool,
    },
}

impl LogRecord {
    /// Returns the record type.
    #[must_use]
    pub fn record_type(&self) -> LogRecordType {
        match self {
            Self::Header(_) => LogRecordType::Header,
            Self::TableDef { .. } => LogRecordType::TableDef,
            Self::Begin { .. } => LogRecordType::Begin,
            Self::Put { .. } => LogRecordType::Put,
            Self::Delete { .. } => LogRecordType::Delete,
            Self::Commit { .. } => LogRecordType::Commit,
            Self::SyncMarker { .. } => LogRecordType::SyncMarker,
        }
    }

    /// Returns the transaction id for batch records.
    #[must_use]
    pub fn txid(&self) -> Option<TransactionId> {
        match self {
            Self::Begin { txid, .. }
            | Self::Put { txid, .. }
            | Self::Delete { txid, .. }
            | Self::Commit { txid, .. } => Some(*txid),
            Self::Header(_) | Self::TableDef { .. } | Self::SyncMarker { .. } => None,
        }
    }

    /// Serializes the record payload as CBOR.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Codec`] if serialization fails.
    pub fn encode_payload(&self) -> CoreResult<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).map_err(|e| CoreError::codec(e.to_string()))?;
        Ok(buf)
    }

    /// Deserializes a payload and checks it matches the frame's type byte.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Corrupted`] if the payload does not decode or
    /// holds a different record type.
    pub fn decode_payload(record_type: LogRecordType, payload: &[u8]) -> CoreResult<Self> {
        let record: Self = ciborium::from_reader(payload)
            .map_err(|e| CoreError::corrupted(format!("undecodable {record_type:?} record: {e}")))?;
        if record.record_type() != record_type {
            return Err(CoreError::corrupted(format!(
                "frame says {record_type:?} but payload holds {:?}",
                record.record_type()
            )));
        }
        Ok(record)
    }

    /// Encodes the full frame: header, payload and checksum.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be encoded or exceeds
    /// [`MAX_PAYLOAD_SIZE`].
    pub fn encode_frame(&self) -> CoreResult<Vec<u8>> {
        let payload = self.encode_payload()?;
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(CoreError::codec(format!(
                "log record payload of {} bytes exceeds {MAX_PAYLOAD_SIZE}",
                payload.len()
            )));
        }
        let len = u32::try_from(payload.len())
            .map_err(|_| CoreError::codec("log record payload too large"))?;

        let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len() + CRC_SIZE);
        frame.extend_from_slice(&LOG_MAGIC);
        frame.extend_from_slice(&LOG_VERSION.to_le_bytes());
        frame.push(self.record_type().as_byte());
        frame.extend_from_slice(&len.to_le_bytes());
        let header_crc = compute_crc32(&frame);
        frame.extend_from_slice(&header_crc.to_le_bytes());
        frame.extend_from_slice(&payload);

        let crc = compute_crc32(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        Ok(frame)
    }
}

/// Parsed fixed-size frame header.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FrameHeader {
    pub record_type: LogRecordType,
    pub payload_len: usize,
}

impl FrameHeader {
    /// Total frame length including checksum.
    pub fn frame_len(&self) -> usize {
        FRAME_HEADER_SIZE + self.payload_len + CRC_SIZE
    }

    /// Validates magic and header checksum, then version, type and length.
    ///
    /// The length is only trusted once the header checksum matches.
    pub fn parse(bytes: &[u8], offset: u64) -> CoreResult<Self> {
        if bytes.len() < FRAME_HEADER_SIZE {
            return Err(CoreError::corrupted(format!(
                "short record header at offset {offset}"
            )));
        }
        if bytes[0..4] != LOG_MAGIC {
            return Err(CoreError::corrupted(format!(
                "invalid magic at offset {offset}"
            )));
        }
        let expected = read_u32(&bytes[FRAME_PREFIX_SIZE..FRAME_HEADER_SIZE]);
        let actual = compute_crc32(&bytes[..FRAME_PREFIX_SIZE]);
        if expected != actual {
            return Err(CoreError::ChecksumMismatch {
                offset,
                expected,
                actual,
            });
        }
        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version == 0 || version > LOG_VERSION {
            return Err(CoreError::corrupted(format!(
                "unsupported record version {version} at offset {offset}"
            )));
        }
        let record_type = LogRecordType::from_byte(bytes[6]).ok_or_else(|| {
            CoreError::corrupted(format!(
                "unknown record type {} at offset {offset}",
                bytes[6]
            ))
        })?;
        let payload_len = read_u32(&bytes[7..FRAME_PREFIX_SIZE]) as usize;
        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(CoreError::corrupted(format!(
                "record at offset {offset} declares {payload_len} payload bytes"
            )));
        }
        Ok(Self {
            record_type,
            payload_len,
        })
    }
}

/// Checks the checksum of a complete frame and decodes its record.
pub(crate) fn decode_frame(frame: &[u8], offset: u64) -> CoreResult<LogRecord> {
    let header = FrameHeader::parse(frame, offset)?;
    if frame.len() != header.frame_len() {
        return Err(CoreError::corrupted(format!(
            "record at offset {offset} is {} bytes, frame says {}",
            frame.len(),
            header.frame_len()
        )));
    }
    let crc_at = frame.len() - CRC_SIZE;
    let expected = read_u32(&frame[crc_at..]);
    let actual = compute_crc32(&frame[..crc_at]);
    if expected != actual {
        return Err(CoreError::ChecksumMismatch {
            offset,
            expected,
            actual,
        });
    }
    LogRecord::decode_payload(header.record_type, &frame[FRAME_HEADER_SIZE..crc_at])
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// CRC-32 (IEEE) of `data`.
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut n = 0;
        while n < 256 {
            let mut c = n as u32;
            let mut k = 0;
            while k < 8 {
                c = if c & 1 != 0 { 0xEDB8_8320 ^ (c >> 1) } else { c >> 1 };
                k += 1;
            }
            table[n] = c;
            n += 1;
        }
        table
    };

    !data.iter().fold(0xFFFF_FFFF_u32, |crc, &byte| {
        TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize] ^ (crc >> 8)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Geometry;

    fn put() -> LogRecord {
        LogRecord::Put {
            txid: TransactionId::new(3),
            table_id: TableId::new(0),
            feature_id: FeatureId::new(12),
            global_id: GlobalId::new(),
            data: FeatureData::with_geometry(Geometry::point(1.5, -2.0)).attribute("type", 3_i64),
        }
    }

    #[test]
    fn record_type_bytes_are_stable() {
        for t in [
            LogRecordType::Header,
            LogRecordType::TableDef,
            LogRecordType::Begin,
            LogRecordType::Put,
            LogRecordType::Delete,
            LogRecordType::Commit,
            LogRecordType::SyncMarker,
        ] {
            assert_eq!(LogRecordType::from_byte(t.as_byte()), Some(t));
        }
        assert_eq!(LogRecordType::from_byte(0), None);
        assert_eq!(LogRecordType::from_byte(8), None);
    }

    #[test]
    fn frame_decodes_to_same_record() {
        let record = put();
        let frame = record.encode_frame().unwrap();
        assert_eq!(&frame[0..4], b"MVDL");
        assert_eq!(frame[6], LogRecordType::Put.as_byte());
        assert_eq!(decode_frame(&frame, 0).unwrap(), record);
    }

    #[test]
    fn flipped_payload_bit_is_checksum_mismatch() {
        let mut frame = put().encode_frame().unwrap();
        frame[FRAME_HEADER_SIZE + 2] ^= 0x40;
        assert!(matches!(
            decode_frame(&frame, 64),
            Err(CoreError::ChecksumMismatch { offset: 64, .. })
        ));
    }

    #[test]
    fn damaged_length_fails_header_checksum() {
        let mut frame = put().encode_frame().unwrap();
        frame[7..11].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            FrameHeader::parse(&frame[..FRAME_HEADER_SIZE], 40),
            Err(CoreError::ChecksumMismatch { offset: 40, .. })
        ));
    }

    #[test]
    fn oversized_length_is_corruption() {
        let mut header = Vec::new();
        header.extend_from_slice(&LOG_MAGIC);
        header.extend_from_slice(&LOG_VERSION.to_le_bytes());
        header.push(LogRecordType::Put.as_byte());
        header.extend_from_slice(&(MAX_PAYLOAD_SIZE as u32 + 1).to_le_bytes());
        let crc = compute_crc32(&header);
        header.extend_from_slice(&crc.to_le_bytes());

        assert!(matches!(
            FrameHeader::parse(&header, 0),
            Err(CoreError::Corrupted { .. })
        ));
    }

    #[test]
    fn bad_magic_is_corruption() {
        let mut frame = put().encode_frame().unwrap();
        frame[0] = b'X';
        assert!(matches!(
            decode_frame(&frame, 0),
            Err(CoreError::Corrupted { .. })
        ));
    }

    #[test]
    fn type_byte_must_match_payload() {
        let record = LogRecord::Commit {
            txid: TransactionId::new(1),
            sequence: SequenceNumber::new(1),
        };
        let payload = record.encode_payload().unwrap();
        assert!(LogRecord::decode_payload(LogRecordType::Commit, &payload).is_ok());
        assert!(LogRecord::decode_payload(LogRecordType::Begin, &payload).is_err());
    }

    #[test]
    fn txid_only_for_batch_records() {
        assert_eq!(put().txid(), Some(TransactionId::new(3)));
        let marker = LogRecord::SyncMarker {
            sequence: SequenceNumber::new(9),
            point: SyncPoint {
                server_generation: 4,
                synced_at: chrono::Utc::now(),
            },
            clears_local: true,
        };
        assert_eq!(marker.txid(), None);
    }

    #[test]
    fn crc32_known_value() {
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(compute_crc32(b""), 0);
    }
}
