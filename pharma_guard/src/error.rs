use crate::core_modules::batch::{BatchId, CheckpointEvent, CheckpointRef};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GuardError {
    #[error("batch not found: {0}")]
    BatchNotFound(BatchId),

    #[error("checkpoint {checkpoint} is not on the route of batch {batch_id}")]
    UnknownCheckpoint {
        batch_id: BatchId,
        checkpoint: CheckpointRef,
    },

    #[error("tablet not found: {0}")]
    TabletNotFound(String),

    #[error("location pool has {available} entries, {requested} requested")]
    InsufficientPool { requested: usize, available: usize },

    #[error("route length must be at least 1")]
    EmptyRoute,

    #[error("invalid temperature range: min {min} must be below max {max}")]
    InvalidRange { min: f64, max: f64 },

    #[error("invalid temperature tolerance: {0}")]
    InvalidTolerance(f64),

    #[error("temperature reading must be a finite number, got {0}")]
    InvalidReading(f64),

    #[error("sticker color could not be read; capture it again")]
    UnreadableSticker,

    #[error("checkpoint {} already recorded for batch {}", .0.checkpoint_name, .0.batch_id)]
    DuplicateCheckpoint(Box<CheckpointEvent>),

    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    #[error("scan dispatcher is shut down")]
    DispatcherClosed,
}

impl GuardError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            GuardError::BatchNotFound(_)
                | GuardError::UnknownCheckpoint { .. }
                | GuardError::TabletNotFound(_)
        )
    }

    /// Outcomes that mean "already done" rather than "rejected".
    pub fn is_informational(&self) -> bool {
        matches!(self, GuardError::DuplicateCheckpoint(_))
    }

    /// The submission may succeed if the operator captures the sticker again.
    pub fn needs_recapture(&self) -> bool {
        matches!(self, GuardError::UnreadableSticker)
    }
}

pub type GuardResult<T> = Result<T, GuardError>;

/// Failures of the persistence collaborator. None of these are retried by the engine.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("blocking store task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("conflicting write: {0}")]
    Conflict(String),

    #[error("corrupt stored row: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
