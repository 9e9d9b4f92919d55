use anyhow::{Context, Result, bail};
use pharma_guard::core_modules::route_assigner::CheckpointDefinition;
use pharma_guard::storage::{LedgerStore, MemoryStore, SqliteStore};
use pharma_guard::{
    EngineConfig, IntegrityEngine, NewBatch, ScanReport, ScanSubmission, StickerColor,
    StickerReading,
};
use serde_json::json;
use std::env;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "Usage:
  scan_tester classify <image_path> [seed]
  scan_tester journey [sqlite_path]";

#[tokio::main]
async fn main() -> Result<()> {
    // --- 1. Environment & Logging ---
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("pharma_guard=info,scan_tester=info")),
        )
        .init();

    // --- 2. Argument Parsing ---
    let args: Vec<String> = env::args().collect();
    let mut config = EngineConfig::from_env().context("reading PHARMA_GUARD_* settings")?;

    match args.get(1).map(String::as_str) {
        Some("classify") => {
            let Some(image_path) = args.get(2) else {
                println!("{USAGE}");
                return Ok(());
            };
            if let Some(seed) = args.get(3) {
                config.rng_seed = Some(seed.parse().context("seed must be an unsigned integer")?);
            }
            classify_still(image_path, config).await
        }
        Some("journey") => run_journey(args.get(2).map(String::as_str), config).await,
        _ => {
            println!("{USAGE}");
            Ok(())
        }
    }
}

/// Classifies one still frame the way a checkpoint scan app would.
async fn classify_still(image_path: &str, config: EngineConfig) -> Result<()> {
    let frame = image::open(image_path)
        .with_context(|| format!("opening {image_path}"))?
        .to_rgba8();
    let engine = IntegrityEngine::in_memory(config);
    let classification = engine.classify_image(&frame).await;

    let info = classification.color.info();
    let report = json!({
        "image": image_path,
        "width": frame.width(),
        "height": frame.height(),
        "color": classification.color,
        "category": classification.category(),
        "confidence": classification.confidence,
        "representative_rgb": classification.representative,
        "label": info.label,
        "status": info.status,
        "message": info.message,
        "estimated_temperature": classification.color.estimated_temperature(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Walks one batch through a three-stop journey: a safe reading, a heat
/// excursion, then a danger sticker on an already invalidated batch.
async fn run_journey(db_path: Option<&str>, config: EngineConfig) -> Result<()> {
    let store: Arc<dyn LedgerStore> = match db_path {
        Some(path) => Arc::new(SqliteStore::open(path).await?),
        None => Arc::new(MemoryStore::new()),
    };
    let engine = IntegrityEngine::new(store, config);
    let mut alerts = engine.subscribe_alerts();

    // --- 1. Batch & Route ---
    let batch = engine
        .create_batch(NewBatch::new("Insulin glargine", 2.0, 8.0).with_tolerance(5.0))
        .await?;
    let route = engine.assign_route(&batch.id, 3).await?;
    info!(batch = %batch.id, stops = route.len(), "journey prepared");
    print_route(&route);

    // --- 2. Checkpoint Scans ---
    let scans = [
        (StickerColor::Green, 6.0),
        (StickerColor::Green, 14.0),
        (StickerColor::Red, 5.0),
    ];
    for (stop, (color, temperature)) in route.iter().zip(scans) {
        let submission = ScanSubmission::new(
            batch.id.clone(),
            stop.ordinal,
            StickerReading::PreClassified(color),
            temperature,
        )
        .with_geolocation(stop.latitude, stop.longitude);

        let report = engine.submit_scan(submission).await?;
        let Some(result) = report.result() else {
            bail!("pre-classified scan at {} was not recorded", stop.name);
        };
        println!(
            "{:>2}. {:<40} {:<7} {:>5.1}°C  -> {} {}",
            stop.ordinal,
            stop.name,
            color.as_str(),
            temperature,
            result.batch_status,
            result
                .invalidation_reason
                .map(|reason| format!("({reason})"))
                .unwrap_or_default(),
        );
        if matches!(report, ScanReport::AlreadyRecorded(_)) {
            println!("    already recorded, nothing appended");
        }
    }

    // --- 3. Alerts & Consumer View ---
    while let Ok(alert) = alerts.try_recv() {
        println!("ALERT {}", serde_json::to_string(&alert)?);
    }
    let tablets = engine.register_tablets(&batch.id, 1).await?;
    let tablet = tablets.first().context("no tablet registered")?;
    let consumer = engine.consumer_report(&tablet.tablet_id).await?;
    println!("{}", serde_json::to_string_pretty(&consumer)?);
    Ok(())
}

fn print_route(route: &[CheckpointDefinition]) {
    for stop in route {
        println!(
            "    #{} {} ({:.4}, {:.4})",
            stop.ordinal, stop.name, stop.latitude, stop.longitude
        );
    }
}
