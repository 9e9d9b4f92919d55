//! SQLite-backed `LedgerStore`.
//!
//! Every call opens its own connection on the blocking pool. The exactly-once
//! operations run inside `BEGIN IMMEDIATE` transactions, which take the write
//! lock before the first read, so the check and the write of a compare-and-set
//! can never interleave with another writer. Uniqueness of checkpoint names and
//! route ordinals per batch is also enforced by the schema.
//!
//! A call whose caller gave up waiting still runs to completion on its blocking
//! thread. That is why the pending alert of an invalidation is a column written
//! in the same transaction as the status, not something the caller remembers.

use super::{AppendOutcome, EventCommit, LedgerStore, RouteOutcome, StatusSwap};
use crate::core_modules::batch::{
    Batch, BatchId, BatchStatus, CheckpointEvent, GeoPoint, InvalidationReason,
    NewCheckpointEvent,
};
use crate::core_modules::location_pool;
use crate::core_modules::route_assigner::{CheckpointDefinition, LocationPoolEntry};
use crate::core_modules::sticker_classifier::StickerColor;
use crate::core_modules::tablets::Tablet;
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task;
use tracing::debug;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS batches (
    batch_id TEXT PRIMARY KEY,
    medicine_name TEXT NOT NULL,
    min_safe REAL NOT NULL,
    max_safe REAL NOT NULL,
    tolerance REAL NOT NULL,
    status TEXT NOT NULL,
    invalidation_reason TEXT,
    created_at TEXT NOT NULL,
    alert_pending INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS checkpoint_events (
    batch_id TEXT NOT NULL REFERENCES batches(batch_id),
    sequence INTEGER NOT NULL,
    checkpoint_name TEXT NOT NULL,
    ordinal INTEGER NOT NULL,
    color TEXT NOT NULL,
    temperature REAL NOT NULL,
    within_range INTEGER NOT NULL,
    recorded_at TEXT NOT NULL,
    latitude REAL,
    longitude REAL,
    PRIMARY KEY (batch_id, sequence),
    UNIQUE (batch_id, checkpoint_name)
);
CREATE TABLE IF NOT EXISTS locations (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    latitude REAL NOT NULL,
    longitude REAL NOT NULL
);
CREATE TABLE IF NOT EXISTS batch_routes (
    batch_id TEXT NOT NULL REFERENCES batches(batch_id),
    ordinal INTEGER NOT NULL,
    name TEXT NOT NULL,
    latitude REAL NOT NULL,
    longitude REAL NOT NULL,
    location_id INTEGER NOT NULL REFERENCES locations(id),
    PRIMARY KEY (batch_id, ordinal),
    UNIQUE (batch_id, location_id)
);
CREATE TABLE IF NOT EXISTS tablets (
    tablet_id TEXT PRIMARY KEY,
    batch_id TEXT NOT NULL REFERENCES batches(batch_id),
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_batches_created_at ON batches(created_at);
CREATE INDEX IF NOT EXISTS idx_tablets_batch ON tablets(batch_id);
"#;

const BATCH_COLUMNS: &str =
    "batch_id, medicine_name, min_safe, max_safe, tolerance, status, invalidation_reason, created_at";
const EVENT_COLUMNS: &str = "batch_id, sequence, checkpoint_name, ordinal, color, temperature, \
     within_range, recorded_at, latitude, longitude";

#[derive(Clone)]
pub struct SqliteStore {
    db_path: PathBuf,
}

impl SqliteStore {
    /// Opens (or creates) the database, applies the schema and seeds the location
    /// pool. Seeding is idempotent, so reopening an existing file is safe.
    pub async fn open(db_path: impl AsRef<Path>) -> StoreResult<Self> {
        let store = Self {
            db_path: db_path.as_ref().to_path_buf(),
        };
        let seeded = store
            .run(|conn| {
                conn.execute_batch(SCHEMA)?;
                add_alert_column(conn)?;
                let tx = conn.transaction()?;
                let mut inserted = 0;
                for entry in location_pool::nepal_districts() {
                    inserted += tx.execute(
                        "INSERT OR IGNORE INTO locations (id, name, latitude, longitude) \
                         VALUES (?1, ?2, ?3, ?4)",
                        params![entry.id, entry.name, entry.latitude, entry.longitude],
                    )?;
                }
                tx.commit()?;
                Ok(inserted)
            })
            .await?;
        debug!(path = %store.db_path.display(), seeded, "sqlite store ready");
        Ok(store)
    }

    async fn run<T, F>(&self, op: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
    {
        let path = self.db_path.clone();
        task::spawn_blocking(move || {
            let mut conn = Connection::open(&path)?;
            conn.busy_timeout(BUSY_TIMEOUT)?;
            op(&mut conn)
        })
        .await?
    }
}

fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("timestamp {raw}: {e}")))
}

fn to_u32(value: i64, what: &str) -> StoreResult<u32> {
    u32::try_from(value).map_err(|_| StoreError::Corrupt(format!("{what} out of range: {value}")))
}

struct BatchRow {
    id: String,
    medicine_name: String,
    min_safe: f64,
    max_safe: f64,
    tolerance: f64,
    status: String,
    reason: Option<String>,
    created_at: String,
}

impl BatchRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            medicine_name: row.get(1)?,
            min_safe: row.get(2)?,
            max_safe: row.get(3)?,
            tolerance: row.get(4)?,
            status: row.get(5)?,
            reason: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    fn into_batch(self) -> StoreResult<Batch> {
        let status = self.status.parse::<BatchStatus>().map_err(StoreError::Corrupt)?;
        let invalidation_reason = self
            .reason
            .map(|raw| raw.parse::<InvalidationReason>())
            .transpose()
            .map_err(StoreError::Corrupt)?;
        Ok(Batch {
            id: BatchId::from(self.id),
            medicine_name: self.medicine_name,
            min_safe: self.min_safe,
            max_safe: self.max_safe,
            tolerance: self.tolerance,
            status,
            invalidation_reason,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

struct EventRow {
    batch_id: String,
    sequence: i64,
    checkpoint_name: String,
    ordinal: i64,
    color: String,
    temperature: f64,
    within_range: bool,
    recorded_at: String,
    latitude: Option<f64>,
    longitude: Option<f64>,
}

impl EventRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            batch_id: row.get(0)?,
            sequence: row.get(1)?,
            checkpoint_name: row.get(2)?,
            ordinal: row.get(3)?,
            color: row.get(4)?,
            temperature: row.get(5)?,
            within_range: row.get(6)?,
            recorded_at: row.get(7)?,
            latitude: row.get(8)?,
            longitude: row.get(9)?,
        })
    }

    fn into_event(self) -> StoreResult<CheckpointEvent> {
        let sequence = u64::try_from(self.sequence)
            .map_err(|_| StoreError::Corrupt(format!("negative sequence {}", self.sequence)))?;
        let color = self
            .color
            .parse::<StickerColor>()
            .map_err(|_| StoreError::Corrupt(format!("sticker color {}", self.color)))?;
        let geolocation = match (self.latitude, self.longitude) {
            (Some(latitude), Some(longitude)) => Some(GeoPoint { latitude, longitude }),
            _ => None,
        };
        Ok(CheckpointEvent {
            batch_id: BatchId::from(self.batch_id),
            sequence,
            checkpoint_name: self.checkpoint_name,
            ordinal: to_u32(self.ordinal, "ordinal")?,
            color,
            temperature: self.temperature,
            within_range: self.within_range,
            recorded_at: parse_timestamp(&self.recorded_at)?,
            geolocation,
        })
    }
}

fn load_batch(conn: &Connection, id: &str) -> StoreResult<Option<Batch>> {
    conn.query_row(
        &format!("SELECT {BATCH_COLUMNS} FROM batches WHERE batch_id = ?1"),
        params![id],
        BatchRow::read,
    )
    .optional()?
    .map(BatchRow::into_batch)
    .transpose()
}

/// Databases created before alerts were tracked lack the column.
fn add_alert_column(conn: &Connection) -> StoreResult<()> {
    let present = conn
        .prepare("SELECT 1 FROM pragma_table_info('batches') WHERE name = 'alert_pending'")?
        .exists([])?;
    if !present {
        conn.execute_batch(
            "ALTER TABLE batches ADD COLUMN alert_pending INTEGER NOT NULL DEFAULT 0",
        )?;
    }
    Ok(())
}

fn alert_pending(conn: &Connection, id: &str) -> StoreResult<bool> {
    Ok(conn.query_row(
        "SELECT alert_pending FROM batches WHERE batch_id = ?1",
        params![id],
        |row| row.get(0),
    )?)
}

fn batch_exists(conn: &Connection, id: &str) -> StoreResult<bool> {
    Ok(conn
        .query_row("SELECT 1 FROM batches WHERE batch_id = ?1", params![id], |_| Ok(()))
        .optional()?
        .is_some())
}

fn load_route(conn: &Connection, id: &str) -> StoreResult<Vec<CheckpointDefinition>> {
    let mut stmt = conn.prepare(
        "SELECT ordinal, name, latitude, longitude, location_id FROM batch_routes \
         WHERE batch_id = ?1 ORDER BY ordinal ASC",
    )?;
    let rows = stmt.query_map(params![id], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, f64>(2)?,
            row.get::<_, f64>(3)?,
            row.get::<_, i64>(4)?,
        ))
    })?;

    let mut route = Vec::new();
    for row in rows {
        let (ordinal, name, latitude, longitude, location_id) = row?;
        route.push(CheckpointDefinition {
            batch_id: BatchId::from(id),
            ordinal: to_u32(ordinal, "ordinal")?,
            name,
            latitude,
            longitude,
            location_id: to_u32(location_id, "location id")?,
        });
    }
    Ok(route)
}

#[async_trait]
impl LedgerStore for SqliteStore {
    async fn insert_batch(&self, batch: Batch) -> StoreResult<()> {
        self.run(move |conn| {
            conn.execute(
                &format!("INSERT INTO batches ({BATCH_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
                params![
                    batch.id.as_str(),
                    batch.medicine_name,
                    batch.min_safe,
                    batch.max_safe,
                    batch.tolerance,
                    batch.status.as_str(),
                    batch.invalidation_reason.map(InvalidationReason::as_str),
                    format_timestamp(&batch.created_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_batch(&self, id: &BatchId) -> StoreResult<Option<Batch>> {
        let id = id.clone();
        self.run(move |conn| load_batch(conn, id.as_str())).await
    }

    async fn list_batches(&self) -> StoreResult<Vec<Batch>> {
        self.run(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {BATCH_COLUMNS} FROM batches ORDER BY created_at DESC, batch_id ASC"
            ))?;
            let rows = stmt.query_map([], BatchRow::read)?;
            let mut batches = Vec::new();
            for row in rows {
                batches.push(row?.into_batch()?);
            }
            Ok(batches)
        })
        .await
    }

    async fn compare_and_set_batch_status(
        &self,
        id: &BatchId,
        expected: BatchStatus,
        new: BatchStatus,
        reason: Option<InvalidationReason>,
    ) -> StoreResult<StatusSwap> {
        let id = id.clone();
        self.run(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let Some(batch) = load_batch(&tx, id.as_str())? else {
                return Ok(StatusSwap::Missing);
            };
            if batch.status != expected {
                return Ok(StatusSwap::Current(batch));
            }
            tx.execute(
                "UPDATE batches SET status = ?1, invalidation_reason = ?2, alert_pending = ?3 \
                 WHERE batch_id = ?4",
                params![
                    new.as_str(),
                    reason.map(InvalidationReason::as_str),
                    new == BatchStatus::Invalidated,
                    id.as_str(),
                ],
            )?;
            tx.commit()?;
            Ok(StatusSwap::Swapped(Batch {
                status: new,
                invalidation_reason: reason,
                ..batch
            }))
        })
        .await
    }

    async fn append_checkpoint_event(
        &self,
        id: &BatchId,
        event: NewCheckpointEvent,
        invalidation: Option<InvalidationReason>,
    ) -> StoreResult<AppendOutcome> {
        let id = id.clone();
        self.run(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let Some(mut batch) = load_batch(&tx, id.as_str())? else {
                return Ok(AppendOutcome::Missing);
            };

            let existing = tx
                .query_row(
                    &format!(
                        "SELECT {EVENT_COLUMNS} FROM checkpoint_events \
                         WHERE batch_id = ?1 AND checkpoint_name = ?2"
                    ),
                    params![id.as_str(), event.checkpoint_name],
                    EventRow::read,
                )
                .optional()?;
            if let Some(existing) = existing {
                return Ok(AppendOutcome::Duplicate(EventCommit {
                    event: existing.into_event()?,
                    alert_pending: alert_pending(&tx, id.as_str())?,
                    batch,
                    invalidated: false,
                }));
            }

            let (next_sequence, last_recorded): (i64, Option<String>) = tx.query_row(
                "SELECT COALESCE(MAX(sequence), 0) + 1, MAX(recorded_at) \
                 FROM checkpoint_events WHERE batch_id = ?1",
                params![id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            // Stored timestamps carry microseconds; truncate now so the returned
            // event equals the row read back later.
            let now = parse_timestamp(&format_timestamp(&Utc::now()))?;
            let recorded_at = match last_recorded.as_deref().map(parse_timestamp).transpose()? {
                Some(last) if last > now => last,
                _ => now,
            };

            tx.execute(
                &format!(
                    "INSERT INTO checkpoint_events ({EVENT_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
                ),
                params![
                    id.as_str(),
                    next_sequence,
                    event.checkpoint_name,
                    event.ordinal,
                    event.color.as_str(),
                    event.temperature,
                    event.within_range,
                    format_timestamp(&recorded_at),
                    event.geolocation.map(|point| point.latitude),
                    event.geolocation.map(|point| point.longitude),
                ],
            )?;

            let mut invalidated = false;
            if let Some(reason) = invalidation {
                if batch.status == BatchStatus::Safe {
                    tx.execute(
                        "UPDATE batches SET status = ?1, invalidation_reason = ?2, alert_pending = 1 \
                         WHERE batch_id = ?3",
                        params![BatchStatus::Invalidated.as_str(), reason.as_str(), id.as_str()],
                    )?;
                    batch.status = BatchStatus::Invalidated;
                    batch.invalidation_reason = Some(reason);
                    invalidated = true;
                }
            }
            let alert_pending = alert_pending(&tx, id.as_str())?;
            tx.commit()?;

            let sequence = u64::try_from(next_sequence)
                .map_err(|_| StoreError::Corrupt(format!("negative sequence {next_sequence}")))?;
            Ok(AppendOutcome::Appended(EventCommit {
                event: CheckpointEvent::from_new(id, sequence, recorded_at, event),
                batch,
                invalidated,
                alert_pending,
            }))
        })
        .await
    }

    async fn claim_invalidation_alert(&self, id: &BatchId) -> StoreResult<bool> {
        let id = id.clone();
        self.run(move |conn| {
            let claimed = conn.execute(
                "UPDATE batches SET alert_pending = 0 WHERE batch_id = ?1 AND alert_pending = 1",
                params![id.as_str()],
            )?;
            Ok(claimed == 1)
        })
        .await
    }

    async fn list_checkpoint_events(&self, id: &BatchId) -> StoreResult<Vec<CheckpointEvent>> {
        let id = id.clone();
        self.run(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {EVENT_COLUMNS} FROM checkpoint_events \
                 WHERE batch_id = ?1 ORDER BY sequence ASC"
            ))?;
            let rows = stmt.query_map(params![id.as_str()], EventRow::read)?;
            let mut events = Vec::new();
            for row in rows {
                events.push(row?.into_event()?);
            }
            Ok(events)
        })
        .await
    }

    async fn get_route(&self, id: &BatchId) -> StoreResult<Vec<CheckpointDefinition>> {
        let id = id.clone();
        self.run(move |conn| load_route(conn, id.as_str())).await
    }

    async fn get_or_create_route(
        &self,
        id: &BatchId,
        entries: Vec<CheckpointDefinition>,
    ) -> StoreResult<RouteOutcome> {
        let id = id.clone();
        self.run(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            if !batch_exists(&tx, id.as_str())? {
                return Ok(RouteOutcome::Missing);
            }
            let existing = load_route(&tx, id.as_str())?;
            if !existing.is_empty() {
                return Ok(RouteOutcome::Existing(existing));
            }

            for def in &entries {
                tx.execute(
                    "INSERT INTO batch_routes (batch_id, ordinal, name, latitude, longitude, location_id) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        id.as_str(),
                        def.ordinal,
                        def.name,
                        def.latitude,
                        def.longitude,
                        def.location_id,
                    ],
                )?;
            }
            tx.commit()?;
            Ok(RouteOutcome::Created(entries))
        })
        .await
    }

    async fn location_pool(&self) -> StoreResult<Vec<LocationPoolEntry>> {
        self.run(|conn| {
            let mut stmt =
                conn.prepare("SELECT id, name, latitude, longitude FROM locations ORDER BY name ASC")?;
            let rows = stmt.query_map([], |row| {
                Ok(LocationPoolEntry {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    latitude: row.get(2)?,
                    longitude: row.get(3)?,
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn insert_tablets(&self, tablets: Vec<Tablet>) -> StoreResult<()> {
        self.run(move |conn| {
            let tx = conn.transaction()?;
            for tablet in &tablets {
                tx.execute(
                    "INSERT INTO tablets (tablet_id, batch_id, created_at) VALUES (?1, ?2, ?3)",
                    params![
                        tablet.tablet_id,
                        tablet.batch_id.as_str(),
                        format_timestamp(&tablet.created_at),
                    ],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn get_tablet(&self, tablet_id: &str) -> StoreResult<Option<Tablet>> {
        let tablet_id = tablet_id.to_string();
        self.run(move |conn| {
            let row = conn
                .query_row(
                    "SELECT tablet_id, batch_id, created_at FROM tablets WHERE tablet_id = ?1",
                    params![tablet_id],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    },
                )
                .optional()?;
            row.map(|(tablet_id, batch_id, created_at)| {
                Ok(Tablet {
                    tablet_id,
                    batch_id: BatchId::from(batch_id),
                    created_at: parse_timestamp(&created_at)?,
                })
            })
            .transpose()
        })
        .await
    }
}
