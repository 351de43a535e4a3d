//! Inspect command implementation.

use mapvault_core::LocalStore;
use serde::Serialize;
use std::path::Path;

/// Dataset inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Dataset path.
    pub path: String,
    /// File size in bytes.
    pub file_size: u64,
    /// Replica id registered with the service.
    pub replica_id: String,
    /// Service the dataset was generated from.
    pub service_url: String,
    /// Sync model.
    pub sync_model: String,
    /// When the dataset was generated (RFC 3339).
    pub created_at: String,
    /// Server generation of the last sync.
    pub server_generation: Option<u64>,
    /// When the last sync was applied (RFC 3339).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synced_at: Option<String>,
    /// Local changes not yet uploaded.
    pub pending_changes: usize,
    /// Per-table statistics.
    pub tables: Vec<TableStats>,
}

/// Statistics for a single table.
#[derive(Debug, Serialize)]
pub struct TableStats {
    /// Table name.
    pub name: String,
    /// Layer id on the service.
    pub layer_id: u32,
    /// Geometry type.
    pub geometry_type: String,
    /// Number of attribute fields.
    pub fields: usize,
    /// Number of rows.
    pub rows: usize,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(path)?;
    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }
    Ok(())
}

/// Opens the dataset and collects its statistics.
pub fn inspect(path: &Path) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let file_size = std::fs::metadata(path)?.len();
    let store = LocalStore::open(path)?;
    let replica = store.replica()?;
    let last_sync = store.last_sync()?;

    let mut tables = Vec::new();
    for table in store.tables()? {
        tables.push(TableStats {
            name: table.name().to_string(),
            layer_id: table.layer_id(),
            geometry_type: format!("{:?}", table.geometry_type()),
            fields: table.fields().len(),
            rows: store.row_count(&table)?,
        });
    }

    let result = InspectResult {
        path: path.display().to_string(),
        file_size,
        replica_id: replica.replica_id.to_string(),
        service_url: replica.service_url,
        sync_model: format!("{:?}", replica.sync_model),
        created_at: replica.created_at.to_rfc3339(),
        server_generation: last_sync.map(|point| point.server_generation),
        synced_at: last_sync.map(|point| point.synced_at.to_rfc3339()),
        pending_changes: store.pending_change_count()?,
        tables,
    };
    store.close()?;
    Ok(result)
}

fn print_text_output(result: &InspectResult) {
    println!("Dataset: {}", result.path);
    println!("  Size:            {} bytes", result.file_size);
    println!("  Replica:         {}", result.replica_id);
    println!("  Service:         {}", result.service_url);
    println!("  Sync model:      {}", result.sync_model);
    println!("  Created:         {}", result.created_at);
    match (&result.server_generation, &result.synced_at) {
        (Some(generation), Some(at)) => {
            println!("  Last sync:       generation {generation} at {at}");
        }
        _ => println!("  Last sync:       never"),
    }
    println!("  Pending changes: {}", result.pending_changes);
    println!();
    println!("Tables:");
    for table in &result.tables {
        println!(
            "  {:<20} layer {:<4} {:<8} {} fields, {} rows",
            table.name, table.layer_id, table.geometry_type, table.fields, table.rows
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{coord, Rect};
    use mapvault_core::{
        DatasetSeed, FeatureChange, FeatureData, FieldDef, FieldType, Geometry, GeometryType,
        GlobalId, ReplicaInfo, StoreConfig, SyncModel, TableSchema,
    };
    use tempfile::tempdir;
    use uuid::Uuid;

    #[test]
    fn inspect_reports_tables_and_sync_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("parks.mvds");
        let extent = Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 10.0, y: 10.0 });
        let trees = TableSchema::new(3, "Trees", GeometryType::Point, extent)
            .with_field(FieldDef::new("height", FieldType::Float));
        let replica = ReplicaInfo::new(
            Uuid::new_v4(),
            "memory://parks",
            SyncModel::Geodatabase,
            extent,
            vec![3],
        );
        let seed = DatasetSeed::new(replica.clone(), vec![trees]).with_features(
            vec![FeatureChange::insert(
                "Trees",
                GlobalId::new(),
                FeatureData::with_geometry(Geometry::point(1.0, 1.0)),
            )],
            4,
        );
        LocalStore::create(&path, &seed, StoreConfig::default())
            .unwrap()
            .close()
            .unwrap();

        let result = inspect(&path).unwrap();
        assert_eq!(result.replica_id, replica.replica_id.to_string());
        assert_eq!(result.server_generation, Some(4));
        assert_eq!(result.pending_changes, 0);
        assert_eq!(result.tables.len(), 1);
        assert_eq!(result.tables[0].name, "Trees");
        assert_eq!(result.tables[0].rows, 1);
        assert_eq!(result.tables[0].fields, 1);

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["tables"][0]["geometry_type"], "Point");
    }

    #[test]
    fn inspect_missing_file_fails() {
        let dir = tempdir().unwrap();
        assert!(inspect(&dir.path().join("missing.mvds")).is_err());
    }
}
