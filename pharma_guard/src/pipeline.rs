// THEORY:
// The `pipeline` module is the top-level API of the thermal-integrity engine. It
// wires the leaf analysers (sampling, clustering, temperature policy) to the
// stateful pieces (ledger, route assigner, tablet registry) behind one facade.
//
// A waypoint scan flows through it in a fixed order:
// 0.  **Sanity**: a temperature that is not a finite number is rejected before
//     any store call.
// 1.  **Resolve**: the batch and the named checkpoint must exist on the batch's
//     assigned route, before any pixel work is done.
// 2.  **Perceive**: raw pixel samples are clustered into a sticker color; a
//     pre-classified color is taken as is. An `unknown` color is never
//     recorded. The caller is asked to capture again instead.
// 3.  **Commit**: the ledger appends the event and applies the invalidation rule.
//
// Classification draws a private generator from the engine's seeded stream and
// releases the stream before clustering, so scans of different batches cluster
// in parallel.
//
// The engine owns no batch state itself; everything durable lives behind the
// `LedgerStore`, so any number of engines can share one store.

use crate::config::EngineConfig;
use crate::core_modules::alerts::{AlertBus, InvalidationAlert};
use crate::core_modules::batch::{
    Batch, BatchId, BatchStatus, CheckpointEvent, CheckpointRef, GeoPoint, InvalidationReason,
    NewBatch,
};
use crate::core_modules::ledger::IntegrityLedger;
use crate::core_modules::pixel::pixel::Pixel;
use crate::core_modules::route_assigner::{CheckpointDefinition, LocationPoolEntry, RouteAssigner};
use crate::core_modules::sample_buffer::sample_buffer::SampleBuffer;
use crate::core_modules::sticker_classifier::{Classification, StickerClassifier, StickerColor};
use crate::core_modules::tablets::{ConsumerReport, Tablet, TabletRegistry};
use crate::core_modules::temperature_policy::{self, TemperatureVerdict};
use crate::error::{GuardError, GuardResult};
use crate::storage::{self, LedgerStore, MemoryStore};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, instrument};

/// The sticker evidence of a scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum StickerReading {
    /// Pixels sampled from the sticker region of a frame.
    RawSample(Vec<Pixel>),
    /// A color already decided by the capture device.
    PreClassified(StickerColor),
}

/// One waypoint submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSubmission {
    pub batch_id: BatchId,
    pub checkpoint: CheckpointRef,
    pub reading: StickerReading,
    pub temperature: f64,
    #[serde(default)]
    pub geolocation: Option<GeoPoint>,
}

impl ScanSubmission {
    pub fn new(
        batch_id: BatchId,
        checkpoint: impl Into<CheckpointRef>,
        reading: StickerReading,
        temperature: f64,
    ) -> Self {
        Self {
            batch_id,
            checkpoint: checkpoint.into(),
            reading,
            temperature,
            geolocation: None,
        }
    }

    pub fn with_geolocation(mut self, latitude: f64, longitude: f64) -> Self {
        self.geolocation = Some(GeoPoint { latitude, longitude });
        self
    }
}

/// The outbound view of a committed scan. Only carries the submitting batch's data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    pub checkpoint_event: CheckpointEvent,
    pub batch_status: BatchStatus,
    pub invalidation_reason: Option<InvalidationReason>,
    pub verdict: TemperatureVerdict,
    /// Present when the color was derived from raw samples.
    pub classification: Option<Classification>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ScanReport {
    /// The sticker could not be read; nothing was recorded.
    RetryCapture { classification: Classification },
    Recorded(ScanResult),
    /// The checkpoint already had an event; the recorded one is returned.
    AlreadyRecorded(ScanResult),
}

impl ScanReport {
    pub fn result(&self) -> Option<&ScanResult> {
        match self {
            ScanReport::Recorded(result) | ScanReport::AlreadyRecorded(result) => Some(result),
            ScanReport::RetryCapture { .. } => None,
        }
    }
}

pub struct IntegrityEngine {
    config: EngineConfig,
    store: Arc<dyn LedgerStore>,
    classifier: StickerClassifier,
    ledger: IntegrityLedger,
    routes: RouteAssigner,
    tablets: TabletRegistry,
    alerts: AlertBus,
    rng: Mutex<StdRng>,
}

fn seeded_rng(seed: Option<u64>, stream: u64) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(stream)),
        None => StdRng::from_entropy(),
    }
}

impl IntegrityEngine {
    pub fn new(store: Arc<dyn LedgerStore>, config: EngineConfig) -> Self {
        let timeout = config.store_timeout();
        let alerts = AlertBus::new(config.alert_capacity);
        let classifier = StickerClassifier::new(config.k, config.max_iterations, config.low_signal_floor);
        let ledger = IntegrityLedger::new(store.clone(), timeout, config.tolerance_celsius, alerts.clone());
        let routes = RouteAssigner::new(store.clone(), timeout, seeded_rng(config.rng_seed, 1));
        let tablets = TabletRegistry::new(store.clone(), timeout);

        info!(
            k = config.k,
            sample_count = config.sample_count,
            tolerance = config.tolerance_celsius,
            seeded = config.rng_seed.is_some(),
            "integrity engine ready"
        );

        Self {
            rng: Mutex::new(seeded_rng(config.rng_seed, 0)),
            config,
            store,
            classifier,
            ledger,
            routes,
            tablets,
            alerts,
        }
    }

    /// An engine over a fresh in-process store seeded with the district pool.
    pub fn in_memory(config: EngineConfig) -> Self {
        Self::new(Arc::new(MemoryStore::new()), config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn create_batch(&self, request: NewBatch) -> GuardResult<Batch> {
        self.ledger.create_batch(request).await
    }

    pub async fn get_batch(&self, batch_id: &BatchId) -> GuardResult<Batch> {
        self.ledger.get_batch(batch_id).await
    }

    pub async fn list_batches(&self) -> GuardResult<Vec<Batch>> {
        self.ledger.list_batches().await
    }

    pub async fn assign_route(
        &self,
        batch_id: &BatchId,
        count: usize,
    ) -> GuardResult<Vec<CheckpointDefinition>> {
        self.routes.assign_route(batch_id, count).await
    }

    /// Assigns a route of the configured default length.
    pub async fn assign_default_route(
        &self,
        batch_id: &BatchId,
    ) -> GuardResult<Vec<CheckpointDefinition>> {
        self.routes
            .assign_route(batch_id, self.config.default_route_length)
            .await
    }

    /// The batch's route, empty when none has been assigned yet.
    pub async fn get_route(&self, batch_id: &BatchId) -> GuardResult<Vec<CheckpointDefinition>> {
        self.ledger.get_batch(batch_id).await?;
        self.routes.get_route(batch_id).await
    }

    pub async fn location_pool(&self) -> GuardResult<Vec<LocationPoolEntry>> {
        Ok(storage::with_deadline(self.config.store_timeout(), self.store.location_pool()).await?)
    }

    /// A generator for one classification. The shared stream is locked only to
    /// draw the seed, so a seeded engine stays reproducible call by call.
    async fn classification_rng(&self) -> StdRng {
        let seed = self.rng.lock().await.next_u64();
        StdRng::seed_from_u64(seed)
    }

    pub async fn classify_samples(&self, samples: &[Pixel]) -> Classification {
        let mut rng = self.classification_rng().await;
        self.classifier.classify(samples, &mut rng)
    }

    /// Samples and classifies a raw row-major RGBA frame.
    pub async fn classify_frame(&self, frame_buffer: &[u8], width: u32, height: u32) -> Classification {
        let mut rng = self.classification_rng().await;
        let buffer = SampleBuffer::from_rgba_frame(
            frame_buffer,
            width,
            height,
            self.config.sample_count,
            self.config.region_fraction,
            &mut rng,
        );
        self.classifier.classify(buffer.as_slice(), &mut rng)
    }

    pub async fn classify_image(&self, image: &image::RgbaImage) -> Classification {
        let mut rng = self.classification_rng().await;
        let buffer = SampleBuffer::from_image(
            image,
            self.config.sample_count,
            self.config.region_fraction,
            &mut rng,
        );
        self.classifier.classify(buffer.as_slice(), &mut rng)
    }

    #[instrument(skip(self, submission), fields(batch = %submission.batch_id, checkpoint = %submission.checkpoint))]
    pub async fn submit_scan(&self, submission: ScanSubmission) -> GuardResult<ScanReport> {
        temperature_policy::validate_reading(submission.temperature)?;
        let (batch, definition) = self
            .ledger
            .resolve_checkpoint(&submission.batch_id, &submission.checkpoint)
            .await?;

        let (color, classification) = match &submission.reading {
            StickerReading::RawSample(samples) => {
                let classification = self.classify_samples(samples).await;
                (classification.color, Some(classification))
            }
            StickerReading::PreClassified(color) => (*color, None),
        };
        if color == StickerColor::Unknown {
            debug!("sticker unreadable, asking for a new capture");
            return Ok(ScanReport::RetryCapture {
                classification: classification.unwrap_or_else(Classification::unknown),
            });
        }

        match self
            .ledger
            .commit_checkpoint(batch, &definition, color, submission.temperature, submission.geolocation)
            .await
        {
            Ok(record) => Ok(ScanReport::Recorded(ScanResult {
                checkpoint_event: record.event,
                batch_status: record.status,
                invalidation_reason: record.invalidation_reason,
                verdict: record.verdict,
                classification,
            })),
            Err(GuardError::DuplicateCheckpoint(existing)) => {
                let current = self.ledger.get_batch(&submission.batch_id).await?;
                Ok(ScanReport::AlreadyRecorded(ScanResult {
                    verdict: current.evaluate(existing.temperature),
                    checkpoint_event: *existing,
                    batch_status: current.status,
                    invalidation_reason: current.invalidation_reason,
                    classification: None,
                }))
            }
            Err(other) => Err(other),
        }
    }

    /// Records a pre-classified reading. Repeats surface as `DuplicateCheckpoint`,
    /// an `unknown` color as `UnreadableSticker`.
    pub async fn record_checkpoint(
        &self,
        batch_id: &BatchId,
        checkpoint: &CheckpointRef,
        color: StickerColor,
        temperature: f64,
        geolocation: Option<GeoPoint>,
    ) -> GuardResult<ScanResult> {
        let record = self
            .ledger
            .record_checkpoint(batch_id, checkpoint, color, temperature, geolocation)
            .await?;
        Ok(ScanResult {
            checkpoint_event: record.event,
            batch_status: record.status,
            invalidation_reason: record.invalidation_reason,
            verdict: record.verdict,
            classification: None,
        })
    }

    pub async fn get_journey(&self, batch_id: &BatchId) -> GuardResult<Vec<CheckpointEvent>> {
        self.ledger.get_journey(batch_id).await
    }

    pub async fn register_tablets(&self, batch_id: &BatchId, count: usize) -> GuardResult<Vec<Tablet>> {
        self.tablets.register_tablets(batch_id, count).await
    }

    pub async fn consumer_report(&self, tablet_id: &str) -> GuardResult<ConsumerReport> {
        self.tablets.consumer_report(tablet_id).await
    }

    pub fn subscribe_alerts(&self) -> broadcast::Receiver<InvalidationAlert> {
        self.alerts.subscribe()
    }
}
