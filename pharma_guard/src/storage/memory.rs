//! In-process `LedgerStore`.
//!
//! Each batch lives in its own slot behind its own mutex, so writers for
//! different batches never contend and the exactly-once operations of one batch
//! are serialised by holding that batch's lock for the whole check-and-write.
//! The outer map lock is only held long enough to find or insert a slot.

use super::{AppendOutcome, EventCommit, LedgerStore, RouteOutcome, StatusSwap};
use crate::core_modules::batch::{
    Batch, BatchId, BatchStatus, CheckpointEvent, InvalidationReason, NewCheckpointEvent,
};
use crate::core_modules::location_pool;
use crate::core_modules::route_assigner::{CheckpointDefinition, LocationPoolEntry};
use crate::core_modules::tablets::Tablet;
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

struct BatchSlot {
    batch: Batch,
    events: Vec<CheckpointEvent>,
    route: Vec<CheckpointDefinition>,
    alert_pending: bool,
}

impl BatchSlot {
    fn commit(&self, event: CheckpointEvent, invalidated: bool) -> EventCommit {
        EventCommit {
            event,
            batch: self.batch.clone(),
            invalidated,
            alert_pending: self.alert_pending,
        }
    }
}

pub struct MemoryStore {
    batches: RwLock<HashMap<BatchId, Arc<Mutex<BatchSlot>>>>,
    tablets: RwLock<HashMap<String, Tablet>>,
    pool: Vec<LocationPoolEntry>,
}

impl MemoryStore {
    /// A store whose location pool is the Nepal district table.
    pub fn new() -> Self {
        Self::with_pool(location_pool::nepal_districts())
    }

    pub fn with_pool(pool: Vec<LocationPoolEntry>) -> Self {
        Self {
            batches: RwLock::new(HashMap::new()),
            tablets: RwLock::new(HashMap::new()),
            pool: location_pool::sorted_by_name(pool),
        }
    }

    async fn slot(&self, id: &BatchId) -> Option<Arc<Mutex<BatchSlot>>> {
        self.batches.read().await.get(id).cloned()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn insert_batch(&self, batch: Batch) -> StoreResult<()> {
        let mut batches = self.batches.write().await;
        if batches.contains_key(&batch.id) {
            return Err(StoreError::Conflict(format!("batch {} already exists", batch.id)));
        }
        batches.insert(
            batch.id.clone(),
            Arc::new(Mutex::new(BatchSlot {
                batch,
                events: Vec::new(),
                route: Vec::new(),
                alert_pending: false,
            })),
        );
        Ok(())
    }

    async fn get_batch(&self, id: &BatchId) -> StoreResult<Option<Batch>> {
        match self.slot(id).await {
            Some(slot) => Ok(Some(slot.lock().await.batch.clone())),
            None => Ok(None),
        }
    }

    async fn list_batches(&self) -> StoreResult<Vec<Batch>> {
        let slots: Vec<_> = self.batches.read().await.values().cloned().collect();
        let mut batches = Vec::with_capacity(slots.len());
        for slot in slots {
            batches.push(slot.lock().await.batch.clone());
        }
        batches.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(batches)
    }

    async fn compare_and_set_batch_status(
        &self,
        id: &BatchId,
        expected: BatchStatus,
        new: BatchStatus,
        reason: Option<InvalidationReason>,
    ) -> StoreResult<StatusSwap> {
        let Some(slot) = self.slot(id).await else {
            return Ok(StatusSwap::Missing);
        };
        let mut slot = slot.lock().await;
        if slot.batch.status != expected {
            return Ok(StatusSwap::Current(slot.batch.clone()));
        }
        slot.batch.status = new;
        slot.batch.invalidation_reason = reason;
        slot.alert_pending = new == BatchStatus::Invalidated;
        Ok(StatusSwap::Swapped(slot.batch.clone()))
    }

    async fn append_checkpoint_event(
        &self,
        id: &BatchId,
        event: NewCheckpointEvent,
        invalidation: Option<InvalidationReason>,
    ) -> StoreResult<AppendOutcome> {
        let Some(slot) = self.slot(id).await else {
            return Ok(AppendOutcome::Missing);
        };
        let mut slot = slot.lock().await;
        if let Some(existing) = slot
            .events
            .iter()
            .find(|recorded| recorded.checkpoint_name == event.checkpoint_name)
            .cloned()
        {
            return Ok(AppendOutcome::Duplicate(slot.commit(existing, false)));
        }

        // Timestamps never go backwards within one batch's journey.
        let now = Utc::now();
        let recorded_at = match slot.events.last() {
            Some(last) if last.recorded_at > now => last.recorded_at,
            _ => now,
        };
        let sequence = slot.events.len() as u64 + 1;
        let committed = CheckpointEvent::from_new(id.clone(), sequence, recorded_at, event);
        slot.events.push(committed.clone());

        let invalidated = match invalidation {
            Some(reason) if slot.batch.status == BatchStatus::Safe => {
                slot.batch.status = BatchStatus::Invalidated;
                slot.batch.invalidation_reason = Some(reason);
                slot.alert_pending = true;
                true
            }
            _ => false,
        };
        Ok(AppendOutcome::Appended(slot.commit(committed, invalidated)))
    }

    async fn claim_invalidation_alert(&self, id: &BatchId) -> StoreResult<bool> {
        let Some(slot) = self.slot(id).await else {
            return Ok(false);
        };
        let mut slot = slot.lock().await;
        Ok(std::mem::take(&mut slot.alert_pending))
    }

    async fn list_checkpoint_events(&self, id: &BatchId) -> StoreResult<Vec<CheckpointEvent>> {
        match self.slot(id).await {
            Some(slot) => Ok(slot.lock().await.events.clone()),
            None => Ok(Vec::new()),
        }
    }

    async fn get_route(&self, id: &BatchId) -> StoreResult<Vec<CheckpointDefinition>> {
        match self.slot(id).await {
            Some(slot) => Ok(slot.lock().await.route.clone()),
            None => Ok(Vec::new()),
        }
    }

    async fn get_or_create_route(
        &self,
        id: &BatchId,
        entries: Vec<CheckpointDefinition>,
    ) -> StoreResult<RouteOutcome> {
        let Some(slot) = self.slot(id).await else {
            return Ok(RouteOutcome::Missing);
        };
        let mut slot = slot.lock().await;
        if !slot.route.is_empty() {
            return Ok(RouteOutcome::Existing(slot.route.clone()));
        }
        slot.route = entries;
        Ok(RouteOutcome::Created(slot.route.clone()))
    }

    async fn location_pool(&self) -> StoreResult<Vec<LocationPoolEntry>> {
        Ok(self.pool.clone())
    }

    async fn insert_tablets(&self, tablets: Vec<Tablet>) -> StoreResult<()> {
        let mut stored = self.tablets.write().await;
        if let Some(clash) = tablets.iter().find(|tablet| stored.contains_key(&tablet.tablet_id)) {
            return Err(StoreError::Conflict(format!("tablet {} already exists", clash.tablet_id)));
        }
        for tablet in tablets {
            stored.insert(tablet.tablet_id.clone(), tablet);
        }
        Ok(())
    }

    async fn get_tablet(&self, tablet_id: &str) -> StoreResult<Option<Tablet>> {
        Ok(self.tablets.read().await.get(tablet_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::sticker_classifier::StickerColor;
    use chrono::Duration as ChronoDuration;

    fn batch(id: &str) -> Batch {
        Batch {
            id: BatchId::from(id),
            medicine_name: "Insulin".into(),
            min_safe: 2.0,
            max_safe: 8.0,
            tolerance: 5.0,
            status: BatchStatus::Safe,
            invalidation_reason: None,
            created_at: Utc::now(),
        }
    }

    fn event(name: &str, ordinal: u32) -> NewCheckpointEvent {
        NewCheckpointEvent {
            checkpoint_name: name.into(),
            ordinal,
            color: StickerColor::Green,
            temperature: 5.0,
            within_range: true,
            geolocation: None,
        }
    }

    #[tokio::test]
    async fn compare_and_set_swaps_once() {
        let store = MemoryStore::new();
        let id = BatchId::from("PG-BATCH-00000001");
        store.insert_batch(batch(id.as_str())).await.expect("insert");

        let first = store
            .compare_and_set_batch_status(
                &id,
                BatchStatus::Safe,
                BatchStatus::Invalidated,
                Some(InvalidationReason::DangerColor),
            )
            .await
            .expect("cas");
        assert!(matches!(first, StatusSwap::Swapped(_)));
        assert!(store.claim_invalidation_alert(&id).await.expect("claim"));

        let second = store
            .compare_and_set_batch_status(
                &id,
                BatchStatus::Safe,
                BatchStatus::Invalidated,
                Some(InvalidationReason::TemperatureExceeded),
            )
            .await
            .expect("cas");
        match second {
            StatusSwap::Current(current) => {
                assert_eq!(current.invalidation_reason, Some(InvalidationReason::DangerColor));
            }
            other => panic!("expected Current, got {other:?}"),
        }

        let missing = store
            .compare_and_set_batch_status(
                &BatchId::from("PG-BATCH-MISSING0"),
                BatchStatus::Safe,
                BatchStatus::Invalidated,
                None,
            )
            .await
            .expect("cas");
        assert_eq!(missing, StatusSwap::Missing);
    }

    #[tokio::test]
    async fn append_assigns_sequences_and_rejects_repeats() {
        let store = MemoryStore::new();
        let id = BatchId::from("PG-BATCH-00000002");
        store.insert_batch(batch(id.as_str())).await.expect("insert");

        let AppendOutcome::Appended(first) =
            store.append_checkpoint_event(&id, event("Kaski", 0), None).await.expect("append")
        else {
            panic!("first append must commit");
        };
        let AppendOutcome::Appended(second) =
            store.append_checkpoint_event(&id, event("Dang", 1), None).await.expect("append")
        else {
            panic!("second append must commit");
        };
        assert_eq!((first.event.sequence, second.event.sequence), (1, 2));
        assert!(second.event.recorded_at >= first.event.recorded_at);
        assert!(!first.invalidated && !first.alert_pending);

        let repeat = store
            .append_checkpoint_event(&id, event("Kaski", 0), Some(InvalidationReason::DangerColor))
            .await
            .expect("append");
        match repeat {
            AppendOutcome::Duplicate(existing) => {
                assert_eq!(existing.event, first.event);
                assert_eq!(existing.batch.status, BatchStatus::Safe);
            }
            other => panic!("expected Duplicate, got {other:?}"),
        }
        assert_eq!(store.list_checkpoint_events(&id).await.expect("list").len(), 2);
    }

    #[tokio::test]
    async fn invalidating_append_swaps_status_and_leaves_one_alert_claim() {
        let store = MemoryStore::new();
        let id = BatchId::from("PG-BATCH-00000004");
        store.insert_batch(batch(id.as_str())).await.expect("insert");

        let AppendOutcome::Appended(red) = store
            .append_checkpoint_event(&id, event("Kaski", 0), Some(InvalidationReason::DangerColor))
            .await
            .expect("append")
        else {
            panic!("append must commit");
        };
        assert!(red.invalidated);
        assert!(red.alert_pending);
        assert_eq!(red.batch.status, BatchStatus::Invalidated);
        assert_eq!(red.batch.invalidation_reason, Some(InvalidationReason::DangerColor));

        // A later invalidating event neither swaps again nor changes the reason.
        let AppendOutcome::Appended(hot) = store
            .append_checkpoint_event(
                &id,
                event("Dang", 1),
                Some(InvalidationReason::TemperatureExceeded),
            )
            .await
            .expect("append")
        else {
            panic!("append must commit");
        };
        assert!(!hot.invalidated);
        assert_eq!(hot.batch.invalidation_reason, Some(InvalidationReason::DangerColor));

        assert!(store.claim_invalidation_alert(&id).await.expect("claim"));
        assert!(!store.claim_invalidation_alert(&id).await.expect("claim"));
        assert!(!store
            .claim_invalidation_alert(&BatchId::from("PG-BATCH-MISSING0"))
            .await
            .expect("claim"));
    }

    #[tokio::test]
    async fn route_is_written_once() {
        let store = MemoryStore::new();
        let id = BatchId::from("PG-BATCH-00000003");
        store.insert_batch(batch(id.as_str())).await.expect("insert");
        let def = |name: &str, ordinal| CheckpointDefinition {
            batch_id: id.clone(),
            ordinal,
            name: name.into(),
            latitude: 27.0,
            longitude: 85.0,
            location_id: ordinal + 1,
        };

        let created = store
            .get_or_create_route(&id, vec![def("A", 0)])
            .await
            .expect("create");
        assert!(matches!(created, RouteOutcome::Created(_)));
        let raced = store
            .get_or_create_route(&id, vec![def("B", 0), def("C", 1)])
            .await
            .expect("create");
        assert_eq!(raced, RouteOutcome::Existing(vec![def("A", 0)]));
    }

    #[tokio::test]
    async fn batches_list_newest_first_and_ids_are_not_reused() {
        let store = MemoryStore::new();
        let mut older = batch("PG-BATCH-0000000A");
        older.created_at = Utc::now() - ChronoDuration::minutes(5);
        store.insert_batch(older.clone()).await.expect("insert");
        store.insert_batch(batch("PG-BATCH-0000000B")).await.expect("insert");

        let listed = store.list_batches().await.expect("list");
        assert_eq!(listed[0].id.as_str(), "PG-BATCH-0000000B");
        assert_eq!(listed[1], older);

        assert!(matches!(
            store.insert_batch(older).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn pool_is_sorted_by_name() {
        let store = MemoryStore::new();
        let pool = store.location_pool().await.expect("pool");
        assert!(pool.windows(2).all(|pair| pair[0].name <= pair[1].name));
    }
}
