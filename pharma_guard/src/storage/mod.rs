// THEORY:
// The `storage` module is the narrow persistence boundary of the engine. The
// engine itself never performs I/O; every read and write of batch state goes
// through `LedgerStore`, and this is the only place where a call may suspend.
//
// The exactly-once invariants (status invalidation, route creation, alerting)
// are not enforced by read-then-write sequences in the engine. They are
// expressed as atomic store operations instead:
// - `append_checkpoint_event` commits one event and, when asked, the
//   `SAFE -> INVALIDATED` swap in the same step, or reports the event already
//   recorded under the same checkpoint name;
// - `compare_and_set_batch_status` swaps a status only if it still holds the
//   expected value;
// - `get_or_create_route` writes a whole route or returns the one that won;
// - `claim_invalidation_alert` hands the pending alert of a transition to
//   exactly one caller.
// Each backend decides how to make these atomic, keyed by batch id (a per-batch
// lock in memory, an immediate transaction in SQLite), never with a global lock.
//
// A deadline can expire after a backend has already committed. The alert flag
// is written together with the transition, so whichever later call on the
// batch sees it pending can still announce the transition.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::core_modules::batch::{
    Batch, BatchId, BatchStatus, CheckpointEvent, InvalidationReason, NewCheckpointEvent,
};
use crate::core_modules::route_assigner::{CheckpointDefinition, LocationPoolEntry};
use crate::core_modules::tablets::Tablet;
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

/// Result of a status compare-and-set.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusSwap {
    /// The status held the expected value and now holds the new one.
    Swapped(Batch),
    /// Another writer got there first; the batch as it currently stands.
    Current(Batch),
    Missing,
}

/// An event together with its batch, as seen inside one atomic append.
#[derive(Debug, Clone, PartialEq)]
pub struct EventCommit {
    pub event: CheckpointEvent,
    /// The batch after the append and any status change it carried.
    pub batch: Batch,
    /// This append moved the batch from `SAFE` to `INVALIDATED`.
    pub invalidated: bool,
    /// The batch's invalidation has not been claimed for alerting yet.
    pub alert_pending: bool,
}

/// Result of an append.
#[derive(Debug, Clone, PartialEq)]
pub enum AppendOutcome {
    Appended(EventCommit),
    /// The checkpoint name already has an event; nothing was written. Carries
    /// the recorded event.
    Duplicate(EventCommit),
    Missing,
}

/// Result of an atomic route get-or-create.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    Created(Vec<CheckpointDefinition>),
    /// A route already existed; the proposed entries were discarded.
    Existing(Vec<CheckpointDefinition>),
    Missing,
}

impl RouteOutcome {
    pub fn into_route(self) -> Option<Vec<CheckpointDefinition>> {
        match self {
            RouteOutcome::Created(route) | RouteOutcome::Existing(route) => Some(route),
            RouteOutcome::Missing => None,
        }
    }
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Inserts a new batch. Ids are minted by the engine and never reused.
    async fn insert_batch(&self, batch: Batch) -> StoreResult<()>;

    async fn get_batch(&self, id: &BatchId) -> StoreResult<Option<Batch>>;

    /// All batches, newest first.
    async fn list_batches(&self) -> StoreResult<Vec<Batch>>;

    /// A swap into `INVALIDATED` leaves an alert pending for the batch.
    async fn compare_and_set_batch_status(
        &self,
        id: &BatchId,
        expected: BatchStatus,
        new: BatchStatus,
        reason: Option<InvalidationReason>,
    ) -> StoreResult<StatusSwap>;

    /// Appends one event. With `invalidation` set, a `SAFE` batch moves to
    /// `INVALIDATED` with that reason in the same atomic step; either both are
    /// visible afterwards or neither is.
    async fn append_checkpoint_event(
        &self,
        id: &BatchId,
        event: NewCheckpointEvent,
        invalidation: Option<InvalidationReason>,
    ) -> StoreResult<AppendOutcome>;

    /// Clears the batch's pending invalidation alert. True for exactly one
    /// caller per transition.
    async fn claim_invalidation_alert(&self, id: &BatchId) -> StoreResult<bool>;

    /// Events in commit order.
    async fn list_checkpoint_events(&self, id: &BatchId) -> StoreResult<Vec<CheckpointEvent>>;

    /// The assigned route ordered by ordinal; empty when none is assigned.
    async fn get_route(&self, id: &BatchId) -> StoreResult<Vec<CheckpointDefinition>>;

    async fn get_or_create_route(
        &self,
        id: &BatchId,
        entries: Vec<CheckpointDefinition>,
    ) -> StoreResult<RouteOutcome>;

    /// The shared location pool, sorted by name.
    async fn location_pool(&self) -> StoreResult<Vec<LocationPoolEntry>>;

    async fn insert_tablets(&self, tablets: Vec<Tablet>) -> StoreResult<()>;

    async fn get_tablet(&self, tablet_id: &str) -> StoreResult<Option<Tablet>>;
}

/// Bounds a store call by `deadline`. An expired call is reported as
/// [`StoreError::Timeout`]. Backends commit atomically, so the call either took
/// effect as a whole or not at all; which one is unknown to the caller.
pub async fn with_deadline<T, F>(deadline: Duration, call: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(deadline)),
    }
}
