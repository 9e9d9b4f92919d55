// THEORY:
// The `ScanDispatcher` fans scan submissions out over a fixed set of worker
// lanes. A lane is picked by hashing the batch id, so:
// - all scans of one batch land on the same lane and are committed in the order
//   they were enqueued;
// - scans of different batches spread over the lanes and run concurrently.
// Lane affinity only orders work. Correctness under concurrent writers still
// comes from the store's atomic operations, so a second dispatcher (or a direct
// caller of the engine) sharing the same store is safe.

use crate::core_modules::batch::BatchId;
use crate::error::{GuardError, GuardResult};
use crate::pipeline::{IntegrityEngine, ScanReport, ScanSubmission};
use futures::future::join_all;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub struct ScanTask {
    pub submission: ScanSubmission,
    pub result_sender: oneshot::Sender<GuardResult<ScanReport>>,
}

pub struct ScanDispatcher {
    lanes: Vec<mpsc::UnboundedSender<ScanTask>>,
    workers: Vec<JoinHandle<()>>,
}

impl ScanDispatcher {
    /// Spawns `lane_count` workers (at least one) on the current runtime.
    pub fn new(engine: Arc<IntegrityEngine>, lane_count: usize) -> Self {
        let lane_count = lane_count.max(1);
        let mut lanes = Vec::with_capacity(lane_count);
        let mut workers = Vec::with_capacity(lane_count);

        for lane in 0..lane_count {
            let (task_sender, mut task_receiver) = mpsc::unbounded_channel::<ScanTask>();
            let engine = engine.clone();

            let worker = tokio::spawn(async move {
                while let Some(task) = task_receiver.recv().await {
                    let report = engine.submit_scan(task.submission).await;
                    if task.result_sender.send(report).is_err() {
                        debug!(lane, "scan caller went away before its report");
                    }
                }
                debug!(lane, "scan lane drained");
            });

            lanes.push(task_sender);
            workers.push(worker);
        }

        Self { lanes, workers }
    }

    /// Uses the engine's configured lane count.
    pub fn for_engine(engine: Arc<IntegrityEngine>) -> Self {
        let lane_count = engine.config().dispatcher_lanes;
        Self::new(engine, lane_count)
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    pub fn lane_for(&self, batch_id: &BatchId) -> usize {
        let mut hasher = DefaultHasher::new();
        batch_id.hash(&mut hasher);
        (hasher.finish() % self.lanes.len() as u64) as usize
    }

    /// Queues a submission and returns the receiver of its report. Submissions
    /// enqueued one after another for the same batch are processed in that order.
    pub fn enqueue(
        &self,
        submission: ScanSubmission,
    ) -> GuardResult<oneshot::Receiver<GuardResult<ScanReport>>> {
        let lane = self.lane_for(&submission.batch_id);
        let (result_sender, result_receiver) = oneshot::channel();
        self.lanes[lane]
            .send(ScanTask {
                submission,
                result_sender,
            })
            .map_err(|_| GuardError::DispatcherClosed)?;
        Ok(result_receiver)
    }

    pub async fn submit(&self, submission: ScanSubmission) -> GuardResult<ScanReport> {
        let receiver = self.enqueue(submission)?;
        receiver.await.map_err(|_| GuardError::DispatcherClosed)?
    }

    /// Queues every submission first, then waits for all reports. Reports come
    /// back in submission order.
    pub async fn submit_all(&self, submissions: Vec<ScanSubmission>) -> Vec<GuardResult<ScanReport>> {
        let pending: Vec<_> = submissions
            .into_iter()
            .map(|submission| self.enqueue(submission))
            .collect();

        join_all(pending.into_iter().map(|queued| async move {
            match queued {
                Ok(receiver) => receiver.await.unwrap_or(Err(GuardError::DispatcherClosed)),
                Err(error) => Err(error),
            }
        }))
        .await
    }

    /// Stops accepting work and waits until every queued scan has been handled.
    pub async fn shutdown(self) {
        drop(self.lanes);
        for joined in join_all(self.workers).await {
            if let Err(error) = joined {
                warn!(%error, "scan lane ended abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    #[tokio::test]
    async fn lanes_are_stable_per_batch() {
        let engine = Arc::new(IntegrityEngine::in_memory(EngineConfig {
            rng_seed: Some(1),
            ..EngineConfig::default()
        }));
        let dispatcher = ScanDispatcher::new(engine, 4);
        assert_eq!(dispatcher.lane_count(), 4);

        let id = BatchId::from("PG-BATCH-1234ABCD");
        let lane = dispatcher.lane_for(&id);
        assert!(lane < 4);
        assert_eq!(dispatcher.lane_for(&id.clone()), lane);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn zero_lanes_still_gets_one_worker() {
        let engine = Arc::new(IntegrityEngine::in_memory(EngineConfig::default()));
        let dispatcher = ScanDispatcher::new(engine, 0);
        assert_eq!(dispatcher.lane_count(), 1);
        dispatcher.shutdown().await;
    }
}
