// THEORY:
// This file is the main entry point for the `pharma_guard` library crate. It
// defines the public API exposed to the outer surfaces (scan apps, the authority
// dashboard, the consumer verifier), none of which live in this crate.
//
// The primary export is the `IntegrityEngine` and its scan types
// (`ScanSubmission`, `ScanReport`), plus the `ScanDispatcher` for callers that
// feed many scans concurrently. The single-purpose analysers and the ledger
// pieces stay reachable under `core_modules` for callers that need one of them
// alone (for example classifying a still frame), and `storage` exposes the
// persistence boundary so a deployment can pick its backend.

pub mod config;
pub mod core_modules;
pub mod error;
pub mod parallel_pipeline;
pub mod pipeline;
pub mod storage;

pub use config::EngineConfig;
pub use core_modules::batch::{Batch, BatchId, BatchStatus, CheckpointRef, InvalidationReason, NewBatch};
pub use core_modules::sticker_classifier::{Classification, StickerColor};
pub use error::{GuardError, GuardResult, StoreError};
pub use parallel_pipeline::ScanDispatcher;
pub use pipeline::{IntegrityEngine, ScanReport, ScanResult, ScanSubmission, StickerReading};
