//! Dump-log command implementation.

use mapvault_core::LogRecord;
use serde::Serialize;
use std::path::Path;

/// Log record representation for output.
#[derive(Debug, Serialize)]
pub struct LogRecordInfo {
    /// Offset in the dataset file.
    pub offset: u64,
    /// Frame length in bytes.
    pub len: usize,
    /// Record type.
    pub record_type: String,
    /// Transaction id (if applicable).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub txid: Option<u64>,
    /// Table id (if applicable).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_id: Option<u32>,
    /// Feature id (if applicable).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature_id: Option<u64>,
    /// Global id (if applicable).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global_id: Option<String>,
    /// Sequence number (if applicable).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
    /// Short description of the payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Runs the dump-log command.
pub fn run(
    path: &Path,
    limit: Option<usize>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let records = read_records(path, limit)?;
    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        _ => {
            print_text_output(&records);
        }
    }
    Ok(())
}

/// Reads up to `limit` records from the start of the log.
pub fn read_records(
    path: &Path,
    limit: Option<usize>,
) -> Result<Vec<LogRecordInfo>, Box<dyn std::error::Error>> {
    let log = super::open_log(path)?;
    let max_records = limit.unwrap_or(usize::MAX);
    let mut records = Vec::new();

    for item in log.iter()?.take(max_records) {
        let (location, record) = item?;
        let mut info = LogRecordInfo {
            offset: location.offset,
            len: location.len,
            record_type: format!("{:?}", record.record_type()).to_uppercase(),
            txid: record.txid().map(|txid| txid.as_u64()),
            table_id: None,
            feature_id: None,
            global_id: None,
            sequence: None,
            detail: None,
        };
        match record {
            LogRecord::Header(replica) => {
                info.detail = Some(format!("replica {} from {}", replica.replica_id, replica.service_url));
            }
            LogRecord::TableDef { table_id, schema } => {
                info.table_id = Some(table_id.as_u32());
                info.detail = Some(format!(
                    "{} ({:?}, {} fields)",
                    schema.name,
                    schema.geometry_type,
                    schema.fields.len()
                ));
            }
            LogRecord::Begin { origin, .. } => {
                info.detail = Some(format!("{origin:?}"));
            }
            LogRecord::Put {
                table_id,
                feature_id,
                global_id,
                data,
                ..
            } => {
                info.table_id = Some(table_id.as_u32());
                info.feature_id = Some(feature_id.as_u64());
                info.global_id = Some(global_id.to_string());
                info.detail = Some(format!("{} attributes", data.attributes.len()));
            }
            LogRecord::Delete {
                table_id,
                feature_id,
                global_id,
                ..
            } => {
                info.table_id = Some(table_id.as_u32());
                info.feature_id = Some(feature_id.as_u64());
                info.global_id = Some(global_id.to_string());
            }
            LogRecord::Commit { sequence, .. } => {
                info.sequence = Some(sequence.as_u64());
            }
            LogRecord::SyncMarker {
                sequence,
                point,
                clears_local,
            } => {
                info.sequence = Some(sequence.as_u64());
                info.detail = Some(format!(
                    "generation {}{}",
                    point.server_generation,
                    if clears_local { ", local changes cleared" } else { "" }
                ));
            }
        }
        records.push(info);
    }

    Ok(records)
}

fn print_text_output(records: &[LogRecordInfo]) {
    println!("{:>10} {:>6}  {:<11} {:>6}  Details", "Offset", "Len", "Type", "TxID");
    println!("{}", "-".repeat(72));
    for record in records {
        let txid = record.txid.map(|t| t.to_string()).unwrap_or_default();
        let mut details = Vec::new();
        if let Some(table) = record.table_id {
            details.push(format!("table={table}"));
        }
        if let Some(feature) = record.feature_id {
            details.push(format!("fid={feature}"));
        }
        if let Some(gid) = &record.global_id {
            details.push(format!("gid={gid}"));
        }
        if let Some(seq) = record.sequence {
            details.push(format!("seq={seq}"));
        }
        if let Some(detail) = &record.detail {
            details.push(detail.clone());
        }
        println!(
            "{:>10} {:>6}  {:<11} {:>6}  {}",
            record.offset,
            record.len,
            record.record_type,
            txid,
            details.join(" ")
        );
    }
    println!();
    println!("Total: {} records", records.len());
}
