// THEORY:
// The `batch` module holds the "dumb" records the ledger reasons about: the batch
// itself, its status, and the append-only checkpoint events of its journey. None
// of these types perform I/O or enforce ordering on their own; the ledger and the
// store do. What they do own is the pure part of the state machine: given a
// temperature verdict and a sticker color, which invalidation cause (if any)
// applies.

use crate::core_modules::sticker_classifier::StickerColor;
use crate::core_modules::temperature_policy::{self, TemperatureVerdict};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

const BATCH_ID_PREFIX: &str = "PG-BATCH-";
const BATCH_ID_SUFFIX_LEN: usize = 8;

/// Opaque batch identifier, `PG-BATCH-XXXXXXXX` when minted by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(String);

impl BatchId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        let simple = Uuid::new_v4().simple().to_string().to_ascii_uppercase();
        Self(format!("{BATCH_ID_PREFIX}{}", &simple[..BATCH_ID_SUFFIX_LEN]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BatchId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for BatchId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Safe,
    Invalidated,
}

impl BatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BatchStatus::Safe => "SAFE",
            BatchStatus::Invalidated => "INVALIDATED",
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SAFE" => Ok(BatchStatus::Safe),
            "INVALIDATED" => Ok(BatchStatus::Invalidated),
            other => Err(format!("unknown batch status {other}")),
        }
    }
}

/// First cause that moved a batch to `INVALIDATED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationReason {
    TemperatureExceeded,
    DangerColor,
}

impl InvalidationReason {
    /// Applies the invalidation rule to one event. Temperature is checked before
    /// color, so an event with both causes records `TemperatureExceeded`.
    pub fn decide(verdict: &TemperatureVerdict, color: StickerColor) -> Option<Self> {
        if verdict.exceeds_limit {
            Some(InvalidationReason::TemperatureExceeded)
        } else if color.is_danger() {
            Some(InvalidationReason::DangerColor)
        } else {
            None
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InvalidationReason::TemperatureExceeded => "temperature_exceeded",
            InvalidationReason::DangerColor => "danger_color",
        }
    }
}

impl fmt::Display for InvalidationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvalidationReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "temperature_exceeded" => Ok(InvalidationReason::TemperatureExceeded),
            "danger_color" => Ok(InvalidationReason::DangerColor),
            other => Err(format!("unknown invalidation reason {other}")),
        }
    }
}

/// One manufactured lot tracked end to end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub id: BatchId,
    pub medicine_name: String,
    pub min_safe: f64,
    pub max_safe: f64,
    /// Margin above `max_safe` tolerated before invalidation.
    pub tolerance: f64,
    pub status: BatchStatus,
    pub invalidation_reason: Option<InvalidationReason>,
    pub created_at: DateTime<Utc>,
}

impl Batch {
    pub fn evaluate(&self, reading: f64) -> TemperatureVerdict {
        temperature_policy::evaluate(reading, self.min_safe, self.max_safe, self.tolerance)
    }

    /// Why `event` invalidates this batch, judged against the batch's thresholds.
    pub fn invalidation_cause(&self, event: &CheckpointEvent) -> Option<InvalidationReason> {
        InvalidationReason::decide(&self.evaluate(event.temperature), event.color)
    }
}

/// Request to create a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBatch {
    pub medicine_name: String,
    pub min_safe: f64,
    pub max_safe: f64,
    /// Falls back to the engine's configured tolerance.
    #[serde(default)]
    pub tolerance: Option<f64>,
}

impl NewBatch {
    pub fn new(medicine_name: impl Into<String>, min_safe: f64, max_safe: f64) -> Self {
        Self {
            medicine_name: medicine_name.into(),
            min_safe,
            max_safe,
            tolerance: None,
        }
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = Some(tolerance);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// How a submission names its checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointRef {
    Name(String),
    Ordinal(u32),
}

impl fmt::Display for CheckpointRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckpointRef::Name(name) => f.write_str(name),
            CheckpointRef::Ordinal(ordinal) => write!(f, "#{ordinal}"),
        }
    }
}

impl From<&str> for CheckpointRef {
    fn from(name: &str) -> Self {
        CheckpointRef::Name(name.to_string())
    }
}

impl From<u32> for CheckpointRef {
    fn from(ordinal: u32) -> Self {
        CheckpointRef::Ordinal(ordinal)
    }
}

/// An event as submitted to the store, before it has a place in the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCheckpointEvent {
    pub checkpoint_name: String,
    pub ordinal: u32,
    pub color: StickerColor,
    pub temperature: f64,
    pub within_range: bool,
    pub geolocation: Option<GeoPoint>,
}

/// A committed ledger entry. `sequence` and `recorded_at` are assigned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointEvent {
    pub batch_id: BatchId,
    pub sequence: u64,
    pub checkpoint_name: String,
    pub ordinal: u32,
    pub color: StickerColor,
    pub temperature: f64,
    pub within_range: bool,
    pub recorded_at: DateTime<Utc>,
    pub geolocation: Option<GeoPoint>,
}

impl CheckpointEvent {
    pub fn from_new(
        batch_id: BatchId,
        sequence: u64,
        recorded_at: DateTime<Utc>,
        event: NewCheckpointEvent,
    ) -> Self {
        Self {
            batch_id,
            sequence,
            checkpoint_name: event.checkpoint_name,
            ordinal: event.ordinal,
            color: event.color,
            temperature: event.temperature,
            within_range: event.within_range,
            recorded_at,
            geolocation: event.geolocation,
        }
    }
}
