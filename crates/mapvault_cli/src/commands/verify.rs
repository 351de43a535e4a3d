//! Verify command implementation.

use mapvault_core::{LogRecord, TransactionId};
use std::path::Path;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of records read.
    pub records_checked: usize,
    /// Number of committed batches.
    pub committed_batches: usize,
    /// Batch left open at the end of the log.
    pub open_batch: Option<TransactionId>,
    /// Bytes after the last complete record.
    pub torn_bytes: u64,
    /// Problems that make the dataset unreadable.
    pub errors: Vec<String>,
}

impl VerifyResult {
    /// Returns true when the dataset opens without loss of committed data.
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying dataset at {:?}", path);
    println!();

    let result = verify(path)?;
    println!("  Records checked:   {}", result.records_checked);
    println!("  Committed batches: {}", result.committed_batches);
    if let Some(txid) = result.open_batch {
        println!("  Uncommitted batch: txid {txid} (discarded on next open)");
    }
    if result.torn_bytes > 0 {
        println!("  Torn tail:         {} bytes (truncated on next open)", result.torn_bytes);
    }
    for error in &result.errors {
        println!("  Error: {error}");
    }

    println!();
    if result.is_ok() {
        println!("✓ Dataset verification passed");
        Ok(())
    } else {
        println!("✗ Dataset verification failed");
        Err("Verification failed".into())
    }
}

/// Scans every record of the dataset log.
pub fn verify(path: &Path) -> Result<VerifyResult, Box<dyn std::error::Error>> {
    let log = super::open_log(path)?;
    let mut result = VerifyResult::default();
    let mut iter = log.iter()?;

    for item in iter.by_ref() {
        let (location, record) = match item {
            Ok(item) => item,
            Err(e) => {
                result.errors.push(e.to_string());
                break;
            }
        };
        if result.records_checked == 0 && !matches!(record, LogRecord::Header(_)) {
            result
                .errors
                .push(format!("record at offset {} is not a header", location.offset));
        }
        result.records_checked += 1;

        match record {
            LogRecord::Header(_) if location.offset != 0 => {
                result
                    .errors
                    .push(format!("second header at offset {}", location.offset));
            }
            LogRecord::Begin { txid, .. } => {
                if let Some(open) = result.open_batch.replace(txid) {
                    result
                        .errors
                        .push(format!("batch {open} never committed before batch {txid}"));
                }
            }
            LogRecord::Put { txid, .. } | LogRecord::Delete { txid, .. } => {
                if result.open_batch != Some(txid) {
                    result.errors.push(format!(
                        "edit for batch {txid} outside its batch at offset {}",
                        location.offset
                    ));
                }
            }
            LogRecord::Commit { txid, .. } => {
                if result.open_batch.take() == Some(txid) {
                    result.committed_batches += 1;
                } else {
                    result.errors.push(format!(
                        "commit for unknown batch {txid} at offset {}",
                        location.offset
                    ));
                }
            }
            _ => {}
        }
    }

    if result.errors.is_empty() {
        result.torn_bytes = iter.size() - iter.position();
    }
    if result.records_checked == 0 && result.errors.is_empty() {
        result.errors.push("dataset has no header".to_string());
    }
    Ok(result)
}
