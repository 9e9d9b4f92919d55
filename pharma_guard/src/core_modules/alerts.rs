//! Broadcast feed of batch invalidations, for whoever watches the cold chain.
//!
//! Publishing never blocks and never fails: with no subscribers the alert is
//! simply dropped, and a slow subscriber sees `Lagged` rather than stalling the
//! ledger.

use crate::core_modules::batch::{BatchId, InvalidationReason};
use crate::core_modules::sticker_classifier::StickerColor;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

pub const DEFAULT_ALERT_CAPACITY: usize = 64;

/// Emitted once per batch, when it moves from `SAFE` to `INVALIDATED`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvalidationAlert {
    pub batch_id: BatchId,
    pub medicine_name: String,
    pub reason: InvalidationReason,
    pub checkpoint_name: String,
    pub color: StickerColor,
    pub temperature: f64,
    pub max_allowed: f64,
    pub raised_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct AlertBus {
    alerts_tx: broadcast::Sender<InvalidationAlert>,
}

impl AlertBus {
    pub fn new(capacity: usize) -> Self {
        let (alerts_tx, _) = broadcast::channel::<InvalidationAlert>(capacity.max(1));
        Self { alerts_tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InvalidationAlert> {
        self.alerts_tx.subscribe()
    }

    /// Returns how many subscribers received the alert.
    pub fn publish(&self, alert: InvalidationAlert) -> usize {
        self.alerts_tx.send(alert).unwrap_or(0)
    }
}

impl Default for AlertBus {
    fn default() -> Self {
        Self::new(DEFAULT_ALERT_CAPACITY)
    }
}
