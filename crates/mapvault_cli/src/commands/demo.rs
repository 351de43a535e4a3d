//! Demo command implementation.
//!
//! Provisions a dataset from an in-memory feature service, adds features in
//! one transaction and synchronizes them back.

use geo::{coord, Rect};
use mapvault_core::{
    FeatureChange, FeatureData, FieldDef, FieldType, Geometry, GeometryType, GlobalId, LocalStore,
    SyncModel, TableSchema,
};
use mapvault_sync::{
    FeatureService, InMemoryFeatureService, JobEvent, ProvisionParams, RemoteDataSource,
    SyncParams, SyncReport,
};
use std::path::Path;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use tracing::info;

const SERVICE_URL: &str = "memory://demo/marine";

/// Outcome of a demo run.
#[derive(Debug)]
pub struct DemoOutcome {
    /// Rows in the `Birds` table after sync.
    pub birds: usize,
    /// Sync report.
    pub report: SyncReport,
    /// Server generation after sync.
    pub server_generation: u64,
}

/// Runs the demo command.
pub fn run(path: &Path, features: usize) -> Result<(), Box<dyn std::error::Error>> {
    let outcome = demo(path, features)?;
    println!();
    println!("Dataset {:?}", path);
    println!("  Birds:             {}", outcome.birds);
    println!("  Uploaded:          {}", outcome.report.uploaded);
    println!("  Downloaded:        {}", outcome.report.downloaded);
    println!("  Server generation: {}", outcome.server_generation);
    Ok(())
}

/// Provisions `path`, adds `features` birds in one transaction and syncs.
pub fn demo(path: &Path, features: usize) -> Result<DemoOutcome, Box<dyn std::error::Error>> {
    if path.exists() {
        return Err(format!("{} already exists; the demo needs a fresh path", path.display()).into());
    }
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let service = Arc::new(marine_service()?);
        let dyn_service: Arc<dyn FeatureService> = service.clone();
        let source = RemoteDataSource::new(dyn_service);

        let params = ProvisionParams::new(SERVICE_URL, extent(), path)
            .with_layers([0])
            .with_sync_model(SyncModel::Layer);
        let job = source.create_provision_job(params)?;
        let events = job.subscribe();
        let store = job.result().await?;
        print_events("provision", &events);

        add_birds(&store, features)?;

        let job = source.create_sync_job(&store, SyncParams::new())?;
        let events = job.subscribe();
        let report = job.result().await?;
        print_events("sync", &events);

        let birds = store.table("Birds")?;
        let outcome = DemoOutcome {
            birds: store.row_count(&birds)?,
            report,
            server_generation: service.generation(),
        };
        store.close()?;
        Ok::<_, Box<dyn std::error::Error>>(outcome)
    })
}

fn extent() -> Rect<f64> {
    Rect::new(coord! { x: -118.0, y: 32.0 }, coord! { x: -116.0, y: 34.0 })
}

fn marine_service() -> Result<InMemoryFeatureService, Box<dyn std::error::Error>> {
    let birds = TableSchema::new(0, "Birds", GeometryType::Point, extent())
        .with_field(FieldDef::new("type", FieldType::Integer))
        .with_field(FieldDef::new("comments", FieldType::Text));
    let service = InMemoryFeatureService::new(SERVICE_URL)
        .with_layer(birds)
        .with_generation_polls(1);
    service.publish(FeatureChange::insert(
        "Birds",
        GlobalId::new(),
        FeatureData::with_geometry(Geometry::point(-117.2, 32.7))
            .attribute("type", 1_i64)
            .attribute("comments", "pelican roost"),
    ))?;
    Ok(service)
}

fn add_birds(store: &LocalStore, count: usize) -> Result<(), Box<dyn std::error::Error>> {
    let birds = store.table("Birds")?;
    let mutator = store.mutator();

    store.begin()?;
    for i in 0..count {
        let mut bird = mutator.create_feature(&birds)?;
        let step = i as f64 * 0.01;
        bird.set_geometry(Geometry::point(-117.0 + step, 33.0 + step));
        mutator.set_attribute(&mut bird, "type", (i % 5) as i64)?;
        mutator.set_attribute(&mut bird, "comments", format!("sighting {}", i + 1))?;
        if let Err(e) = mutator.add_feature(&birds, &mut bird) {
            store.rollback()?;
            return Err(e.into());
        }
    }
    let sequence = store.commit()?;
    info!(count, ?sequence, "demo edits committed");
    Ok(())
}

fn print_events(label: &str, events: &Receiver<JobEvent>) {
    for event in events.try_iter() {
        match event.error {
            Some(error) => println!("{label} job {}: {:?} ({error})", event.job_id, event.status),
            None => println!("{label} job {}: {:?}", event.job_id, event.status),
        }
    }
}
