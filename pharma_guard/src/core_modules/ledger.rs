// THEORY:
// The `IntegrityLedger` is the per-batch state machine. A batch starts `SAFE` and
// can move to `INVALIDATED` exactly once; there is no way back.
//
// Every accepted checkpoint submission is one atomic store step: the event is
// appended (first name wins) and, if it trips the invalidation rule (temperature
// over the limit, or a danger-colored sticker), the status swaps
// `SAFE -> INVALIDATED` in the same commit. There is no state in which a danger
// event is on the journey while the batch still reads `SAFE`.
//
// Announcing a transition (one warning, one alert) is driven by a pending flag
// the store writes together with the swap. Any commit that sees the flag claims
// it, and the store hands the claim to exactly one caller. So a transition whose
// own call timed out after committing is still announced by the next call on the
// batch, and two racing invalidations still announce once.
//
// Readings are checked before any I/O: a non-finite temperature or an unreadable
// sticker is rejected, never stored.

use crate::core_modules::alerts::{AlertBus, InvalidationAlert};
use crate::core_modules::batch::{
    Batch, BatchId, BatchStatus, CheckpointEvent, CheckpointRef, GeoPoint, InvalidationReason,
    NewBatch, NewCheckpointEvent,
};
use crate::core_modules::route_assigner::{self, CheckpointDefinition};
use crate::core_modules::sticker_classifier::StickerColor;
use crate::core_modules::temperature_policy::{self, TemperatureVerdict};
use crate::error::{GuardError, GuardResult};
use crate::storage::{self, AppendOutcome, EventCommit, LedgerStore};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// What one accepted checkpoint submission did to its batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub event: CheckpointEvent,
    pub status: BatchStatus,
    /// The batch's first invalidation cause, not necessarily this event's.
    pub invalidation_reason: Option<InvalidationReason>,
    pub verdict: TemperatureVerdict,
}

pub struct IntegrityLedger {
    store: Arc<dyn LedgerStore>,
    store_timeout: Duration,
    default_tolerance: f64,
    alerts: AlertBus,
}

impl IntegrityLedger {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        store_timeout: Duration,
        default_tolerance: f64,
        alerts: AlertBus,
    ) -> Self {
        Self {
            store,
            store_timeout,
            default_tolerance,
            alerts,
        }
    }

    #[instrument(skip(self, request), fields(medicine = %request.medicine_name))]
    pub async fn create_batch(&self, request: NewBatch) -> GuardResult<Batch> {
        let tolerance = request.tolerance.unwrap_or(self.default_tolerance);
        temperature_policy::validate_thresholds(request.min_safe, request.max_safe, tolerance)?;

        let batch = Batch {
            id: BatchId::generate(),
            medicine_name: request.medicine_name,
            min_safe: request.min_safe,
            max_safe: request.max_safe,
            tolerance,
            status: BatchStatus::Safe,
            invalidation_reason: None,
            created_at: Utc::now(),
        };
        storage::with_deadline(self.store_timeout, self.store.insert_batch(batch.clone())).await?;
        info!(batch = %batch.id, min = batch.min_safe, max = batch.max_safe, "batch created");
        Ok(batch)
    }

    pub async fn get_batch(&self, batch_id: &BatchId) -> GuardResult<Batch> {
        storage::with_deadline(self.store_timeout, self.store.get_batch(batch_id))
            .await?
            .ok_or_else(|| GuardError::BatchNotFound(batch_id.clone()))
    }

    pub async fn list_batches(&self) -> GuardResult<Vec<Batch>> {
        Ok(storage::with_deadline(self.store_timeout, self.store.list_batches()).await?)
    }

    /// Resolves a submission's checkpoint through the batch's assigned route.
    pub async fn resolve_checkpoint(
        &self,
        batch_id: &BatchId,
        checkpoint: &CheckpointRef,
    ) -> GuardResult<(Batch, CheckpointDefinition)> {
        let batch = self.get_batch(batch_id).await?;
        let route = storage::with_deadline(self.store_timeout, self.store.get_route(batch_id)).await?;
        let definition = route_assigner::find_checkpoint(&route, checkpoint)
            .cloned()
            .ok_or_else(|| GuardError::UnknownCheckpoint {
                batch_id: batch_id.clone(),
                checkpoint: checkpoint.clone(),
            })?;
        Ok((batch, definition))
    }

    #[instrument(skip(self, geolocation), fields(batch = %batch_id, checkpoint = %checkpoint))]
    pub async fn record_checkpoint(
        &self,
        batch_id: &BatchId,
        checkpoint: &CheckpointRef,
        color: StickerColor,
        temperature: f64,
        geolocation: Option<GeoPoint>,
    ) -> GuardResult<CheckpointRecord> {
        check_reading(color, temperature)?;
        let (batch, definition) = self.resolve_checkpoint(batch_id, checkpoint).await?;
        self.commit_checkpoint(batch, &definition, color, temperature, geolocation)
            .await
    }

    /// Appends the event for an already resolved checkpoint and applies the
    /// invalidation rule in the same store commit.
    pub async fn commit_checkpoint(
        &self,
        batch: Batch,
        definition: &CheckpointDefinition,
        color: StickerColor,
        temperature: f64,
        geolocation: Option<GeoPoint>,
    ) -> GuardResult<CheckpointRecord> {
        check_reading(color, temperature)?;
        let verdict = batch.evaluate(temperature);
        let invalidation = InvalidationReason::decide(&verdict, color);
        let submitted = NewCheckpointEvent {
            checkpoint_name: definition.name.clone(),
            ordinal: definition.ordinal,
            color,
            temperature,
            within_range: verdict.within_range,
            geolocation,
        };

        let append = self
            .store
            .append_checkpoint_event(&batch.id, submitted, invalidation);
        match storage::with_deadline(self.store_timeout, append).await? {
            AppendOutcome::Appended(commit) => {
                debug!(sequence = commit.event.sequence, %color, temperature, "checkpoint appended");
                self.announce_invalidation(&commit).await?;
                Ok(CheckpointRecord {
                    status: commit.batch.status,
                    invalidation_reason: commit.batch.invalidation_reason,
                    event: commit.event,
                    verdict,
                })
            }
            AppendOutcome::Duplicate(commit) => {
                debug!(sequence = commit.event.sequence, "checkpoint already recorded");
                self.announce_invalidation(&commit).await?;
                Err(GuardError::DuplicateCheckpoint(Box::new(commit.event)))
            }
            AppendOutcome::Missing => Err(GuardError::BatchNotFound(batch.id)),
        }
    }

    /// Events of one batch in commit order.
    #[instrument(skip(self), fields(batch = %batch_id))]
    pub async fn get_journey(&self, batch_id: &BatchId) -> GuardResult<Vec<CheckpointEvent>> {
        self.get_batch(batch_id).await?;
        Ok(storage::with_deadline(self.store_timeout, self.store.list_checkpoint_events(batch_id))
            .await?)
    }

    /// Logs and publishes the batch's invalidation if it is still pending and
    /// this caller wins the claim.
    async fn announce_invalidation(&self, commit: &EventCommit) -> GuardResult<()> {
        if !commit.alert_pending {
            return Ok(());
        }
        let batch = &commit.batch;
        let claim = self.store.claim_invalidation_alert(&batch.id);
        if !storage::with_deadline(self.store_timeout, claim).await? {
            return Ok(());
        }

        // The first event that trips the rule is the one that swapped the status.
        let trigger = if commit.invalidated {
            commit.event.clone()
        } else {
            let journey = storage::with_deadline(
                self.store_timeout,
                self.store.list_checkpoint_events(&batch.id),
            )
            .await?;
            journey
                .into_iter()
                .find(|event| batch.invalidation_cause(event).is_some())
                .unwrap_or_else(|| commit.event.clone())
        };
        let verdict = batch.evaluate(trigger.temperature);
        let Some(reason) = batch
            .invalidation_reason
            .or_else(|| batch.invalidation_cause(&trigger))
        else {
            return Ok(());
        };

        warn!(
            batch = %batch.id,
            %reason,
            checkpoint = %trigger.checkpoint_name,
            temperature = trigger.temperature,
            max_allowed = verdict.max_allowed,
            "batch invalidated"
        );
        self.alerts.publish(InvalidationAlert {
            batch_id: batch.id.clone(),
            medicine_name: batch.medicine_name.clone(),
            reason,
            checkpoint_name: trigger.checkpoint_name.clone(),
            color: trigger.color,
            temperature: trigger.temperature,
            max_allowed: verdict.max_allowed,
            raised_at: Utc::now(),
        });
        Ok(())
    }
}

/// Rejects readings that must never reach the journey.
fn check_reading(color: StickerColor, temperature: f64) -> GuardResult<()> {
    temperature_policy::validate_reading(temperature)?;
    if color == StickerColor::Unknown {
        return Err(GuardError::UnreadableSticker);
    }
    Ok(())
}
