// THEORY:
// The `RouteAssigner` gives every batch its ordered list of checkpoints, once.
//
// Drawing a route is pure: shuffle the shared pool with the injected random
// source, take the first `count` entries, number them in draw order and relabel
// ordinal 0 as the dispatch origin (the coordinates stay those of the drawn
// district). Persisting it is the only part that must be exactly-once, and that
// is delegated to the store's atomic `get_or_create_route`. Two racing callers may
// both draw a route, but only one is written and both receive the written one.

use crate::core_modules::batch::{BatchId, CheckpointRef};
use crate::error::{GuardError, GuardResult};
use crate::storage::{self, LedgerStore, RouteOutcome};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

/// One place a batch can be routed through. Read-only and shared by all batches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationPoolEntry {
    pub id: u32,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// A waypoint on one batch's route, identified by (batch id, ordinal).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointDefinition {
    pub batch_id: BatchId,
    pub ordinal: u32,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Pool entry the checkpoint was drawn from.
    pub location_id: u32,
}

pub fn dispatch_label(district: &str) -> String {
    format!("Manufacturer Dispatch ({district})")
}

/// Draws `count` distinct pool entries without replacement and numbers them
/// from 0 in draw order. Does not touch the store.
pub fn draw_route<R: Rng + ?Sized>(
    batch_id: &BatchId,
    pool: &[LocationPoolEntry],
    count: usize,
    rng: &mut R,
) -> GuardResult<Vec<CheckpointDefinition>> {
    if count == 0 {
        return Err(GuardError::EmptyRoute);
    }
    if pool.len() < count {
        return Err(GuardError::InsufficientPool {
            requested: count,
            available: pool.len(),
        });
    }

    let mut drawn: Vec<&LocationPoolEntry> = pool.iter().collect();
    drawn.shuffle(rng);
    drawn.truncate(count);

    Ok(drawn
        .into_iter()
        .zip(0u32..)
        .map(|(entry, ordinal)| CheckpointDefinition {
            batch_id: batch_id.clone(),
            ordinal,
            name: if ordinal == 0 {
                dispatch_label(&entry.name)
            } else {
                entry.name.clone()
            },
            latitude: entry.latitude,
            longitude: entry.longitude,
            location_id: entry.id,
        })
        .collect())
}

/// Looks a submission's checkpoint up on an assigned route.
pub fn find_checkpoint<'a>(
    route: &'a [CheckpointDefinition],
    checkpoint: &CheckpointRef,
) -> Option<&'a CheckpointDefinition> {
    match checkpoint {
        CheckpointRef::Name(name) => route.iter().find(|def| &def.name == name),
        CheckpointRef::Ordinal(ordinal) => route.iter().find(|def| def.ordinal == *ordinal),
    }
}

pub struct RouteAssigner {
    store: Arc<dyn LedgerStore>,
    store_timeout: Duration,
    rng: Mutex<StdRng>,
}

impl RouteAssigner {
    pub fn new(store: Arc<dyn LedgerStore>, store_timeout: Duration, rng: StdRng) -> Self {
        Self {
            store,
            store_timeout,
            rng: Mutex::new(rng),
        }
    }

    /// Returns the batch's route, creating it on first call. Later calls return
    /// the stored route unchanged whatever `count` they pass.
    #[instrument(skip(self), fields(batch = %batch_id))]
    pub async fn assign_route(
        &self,
        batch_id: &BatchId,
        count: usize,
    ) -> GuardResult<Vec<CheckpointDefinition>> {
        if count == 0 {
            return Err(GuardError::EmptyRoute);
        }

        let deadline = self.store_timeout;
        if storage::with_deadline(deadline, self.store.get_batch(batch_id))
            .await?
            .is_none()
        {
            return Err(GuardError::BatchNotFound(batch_id.clone()));
        }

        let existing = storage::with_deadline(deadline, self.store.get_route(batch_id)).await?;
        if !existing.is_empty() {
            debug!(checkpoints = existing.len(), "route already assigned");
            return Ok(existing);
        }

        let pool = storage::with_deadline(deadline, self.store.location_pool()).await?;
        let proposed = {
            let mut rng = self.rng.lock().await;
            draw_route(batch_id, &pool, count, &mut *rng)?
        };

        match storage::with_deadline(deadline, self.store.get_or_create_route(batch_id, proposed))
            .await?
        {
            RouteOutcome::Created(route) => {
                info!(checkpoints = route.len(), origin = %route[0].name, "route assigned");
                Ok(route)
            }
            RouteOutcome::Existing(route) => {
                debug!("lost route race, returning the stored route");
                Ok(route)
            }
            RouteOutcome::Missing => Err(GuardError::BatchNotFound(batch_id.clone())),
        }
    }

    #[instrument(skip(self), fields(batch = %batch_id))]
    pub async fn get_route(&self, batch_id: &BatchId) -> GuardResult<Vec<CheckpointDefinition>> {
        Ok(storage::with_deadline(self.store_timeout, self.store.get_route(batch_id)).await?)
    }
}
