//! Tablet registration and the consumer-facing verification report.
//!
//! A tablet is a unit dispensed from a batch. It carries no state of its own: a
//! consumer scanning it sees the batch's status and journey as they stand now.

use crate::core_modules::batch::{BatchId, BatchStatus, CheckpointEvent};
use crate::error::{GuardError, GuardResult};
use crate::storage::{self, LedgerStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

pub const MAX_TABLETS_PER_CALL: usize = 100;

const TABLET_ID_PREFIX: &str = "PG-TAB-";
const TABLET_ID_SUFFIX_LEN: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tablet {
    pub tablet_id: String,
    pub batch_id: BatchId,
    pub created_at: DateTime<Utc>,
}

pub fn generate_tablet_id() -> String {
    let simple = Uuid::new_v4().simple().to_string().to_ascii_uppercase();
    format!("{TABLET_ID_PREFIX}{}", &simple[..TABLET_ID_SUFFIX_LEN])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsumerVerdict {
    GenuineSafe,
    GenuineHeatDamaged,
}

impl ConsumerVerdict {
    pub fn for_status(status: BatchStatus) -> Self {
        match status {
            BatchStatus::Safe => ConsumerVerdict::GenuineSafe,
            BatchStatus::Invalidated => ConsumerVerdict::GenuineHeatDamaged,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            ConsumerVerdict::GenuineSafe => {
                "GENUINE & SAFE - This medicine has been properly stored throughout its journey."
            }
            ConsumerVerdict::GenuineHeatDamaged => {
                "GENUINE but HEAT-DAMAGED - This medicine was exposed to unsafe temperatures during transport. Do not use."
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumerReport {
    pub tablet_id: String,
    pub batch_id: BatchId,
    pub medicine_name: String,
    pub batch_status: BatchStatus,
    pub verdict: ConsumerVerdict,
    pub message: String,
    pub journey: Vec<CheckpointEvent>,
}

pub struct TabletRegistry {
    store: Arc<dyn LedgerStore>,
    store_timeout: Duration,
}

impl TabletRegistry {
    pub fn new(store: Arc<dyn LedgerStore>, store_timeout: Duration) -> Self {
        Self { store, store_timeout }
    }

    /// Mints `count` tablets for an existing batch. `count` is clamped to
    /// 1..=[`MAX_TABLETS_PER_CALL`].
    #[instrument(skip(self), fields(batch = %batch_id))]
    pub async fn register_tablets(&self, batch_id: &BatchId, count: usize) -> GuardResult<Vec<Tablet>> {
        let deadline = self.store_timeout;
        if storage::with_deadline(deadline, self.store.get_batch(batch_id))
            .await?
            .is_none()
        {
            return Err(GuardError::BatchNotFound(batch_id.clone()));
        }

        let created_at = Utc::now();
        let tablets: Vec<Tablet> = (0..count.clamp(1, MAX_TABLETS_PER_CALL))
            .map(|_| Tablet {
                tablet_id: generate_tablet_id(),
                batch_id: batch_id.clone(),
                created_at,
            })
            .collect();

        storage::with_deadline(deadline, self.store.insert_tablets(tablets.clone())).await?;
        info!(count = tablets.len(), "tablets registered");
        Ok(tablets)
    }

    #[instrument(skip(self))]
    pub async fn consumer_report(&self, tablet_id: &str) -> GuardResult<ConsumerReport> {
        let deadline = self.store_timeout;
        let tablet = storage::with_deadline(deadline, self.store.get_tablet(tablet_id))
            .await?
            .ok_or_else(|| GuardError::TabletNotFound(tablet_id.to_string()))?;
        let batch = storage::with_deadline(deadline, self.store.get_batch(&tablet.batch_id))
            .await?
            .ok_or_else(|| GuardError::BatchNotFound(tablet.batch_id.clone()))?;
        let journey =
            storage::with_deadline(deadline, self.store.list_checkpoint_events(&batch.id)).await?;

        let verdict = ConsumerVerdict::for_status(batch.status);
        Ok(ConsumerReport {
            tablet_id: tablet.tablet_id,
            batch_id: batch.id,
            medicine_name: batch.medicine_name,
            batch_status: batch.status,
            verdict,
            message: verdict.message().to_string(),
            journey,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tablet_ids_follow_the_tablet_format() {
        let id = generate_tablet_id();
        let suffix = id.strip_prefix("PG-TAB-").expect("prefix");
        assert_eq!(suffix.len(), 6);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }

    #[test]
    fn verdict_follows_batch_status() {
        assert_eq!(
            ConsumerVerdict::for_status(BatchStatus::Safe),
            ConsumerVerdict::GenuineSafe
        );
        let damaged = ConsumerVerdict::for_status(BatchStatus::Invalidated);
        assert_eq!(damaged, ConsumerVerdict::GenuineHeatDamaged);
        assert!(damaged.message().contains("Do not use"));
        assert_eq!(
            serde_json::to_string(&damaged).expect("serializes"),
            "\"GENUINE_HEAT_DAMAGED\""
        );
    }
}
