//! CLI command implementations.

pub mod demo;
pub mod dump_log;
pub mod inspect;
pub mod verify;

use mapvault_core::DatasetLog;
use mapvault_storage::FileBackend;
use std::path::Path;

/// Opens a dataset file for raw log access, without taking the lock.
pub fn open_log(path: &Path) -> Result<DatasetLog, Box<dyn std::error::Error>> {
    let backend = FileBackend::open_existing(path)?;
    Ok(DatasetLog::new(Box::new(backend)))
}
