//! Event record store: a Postgres implementation for real runs and an
//! in-memory one for fixture runs and tests. Writes only happen through an
//! [`EventTransaction`], which is either committed or rolled back as a whole.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use otd_core::{EventId, EventRecord, TargetDay};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tokio::sync::Mutex;

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Opens the unit of work all harvest writes go through.
    async fn begin(&self) -> Result<Box<dyn EventTransaction>>;

    /// Committed events on `day` across all years, oldest first.
    async fn events_on_day(&self, day: TargetDay) -> Result<Vec<EventRecord>>;
}

#[async_trait]
pub trait EventTransaction: Send {
    /// Staged events on `day` across all years, in id order.
    async fn events_on_day(&mut self, day: TargetDay) -> Result<Vec<EventRecord>>;
    async fn events_on_date(&mut self, date: NaiveDate) -> Result<Vec<EventRecord>>;
    async fn insert(&mut self, date: NaiveDate, description: &str) -> Result<EventRecord>;
    async fn update_description(&mut self, id: EventId, description: &str) -> Result<()>;
    async fn delete(&mut self, ids: &[EventId]) -> Result<u64>;
    async fn commit(self: Box<Self>) -> Result<()>;
    async fn rollback(self: Box<Self>) -> Result<()>;
}

const EVENT_COLUMNS: &str = "id, date, description, created_at, modified_at";

fn event_from_row(row: &PgRow) -> Result<EventRecord> {
    Ok(EventRecord {
        id: row.try_get("id")?,
        date: row.try_get("date")?,
        description: row.try_get("description")?,
        created_at: row.try_get("created_at")?,
        modified_at: row.try_get("modified_at")?,
    })
}

#[derive(Debug, Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn begin(&self) -> Result<Box<dyn EventTransaction>> {
        let tx = self
            .pool
            .begin()
            .await
            .context("Failed to open transaction")?;
        Ok(Box::new(PgEventTransaction { tx }))
    }

    async fn events_on_day(&self, day: TargetDay) -> Result<Vec<EventRecord>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM events
            WHERE EXTRACT(MONTH FROM date)::int = $1
              AND EXTRACT(DAY FROM date)::int = $2
            ORDER BY date, id
            "#
        ))
        .bind(day.month() as i32)
        .bind(day.day() as i32)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("Failed to list events for {day}"))?;

        rows.iter().map(event_from_row).collect()
    }
}

pub struct PgEventTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl EventTransaction for PgEventTransaction {
    async fn events_on_day(&mut self, day: TargetDay) -> Result<Vec<EventRecord>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM events
            WHERE EXTRACT(MONTH FROM date)::int = $1
              AND EXTRACT(DAY FROM date)::int = $2
            ORDER BY id
            "#
        ))
        .bind(day.month() as i32)
        .bind(day.day() as i32)
        .fetch_all(&mut *self.tx)
        .await
        .with_context(|| format!("Failed to list events for {day}"))?;

        rows.iter().map(event_from_row).collect()
    }

    async fn events_on_date(&mut self, date: NaiveDate) -> Result<Vec<EventRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE date = $1 ORDER BY id"
        ))
        .bind(date)
        .fetch_all(&mut *self.tx)
        .await
        .with_context(|| format!("Failed to list events dated {date}"))?;

        rows.iter().map(event_from_row).collect()
    }

    async fn insert(&mut self, date: NaiveDate, description: &str) -> Result<EventRecord> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO events (date, description)
            VALUES ($1, $2)
            RETURNING {EVENT_COLUMNS}
            "#
        ))
        .bind(date)
        .bind(description)
        .fetch_one(&mut *self.tx)
        .await
        .context("Failed to insert event")?;

        event_from_row(&row)
    }

    async fn update_description(&mut self, id: EventId, description: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE events
               SET description = $2,
                   modified_at = NOW()
             WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(description)
        .execute(&mut *self.tx)
        .await
        .with_context(|| format!("Failed to update event {id}"))?;
        Ok(())
    }

    async fn delete(&mut self, ids: &[EventId]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query("DELETE FROM events WHERE id = ANY($1)")
            .bind(ids)
            .execute(&mut *self.tx)
            .await
            .context("Failed to delete events")?;
        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.context("Failed to commit transaction")
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx
            .rollback()
            .await
            .context("Failed to roll back transaction")
    }
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    records: Vec<EventRecord>,
    next_id: EventId,
}

/// Process-local store. A transaction works on a private copy that replaces
/// the shared state on commit; concurrent transactions are last-writer-wins.
#[derive(Debug, Clone, Default)]
pub struct MemoryEventStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds committed records directly, bypassing any transaction.
    pub async fn seed(&self, date: NaiveDate, description: &str) -> EventRecord {
        let mut state = self.state.lock().await;
        insert_into(&mut state, date, description)
    }

    /// All committed records in insertion order.
    pub async fn snapshot(&self) -> Vec<EventRecord> {
        self.state.lock().await.records.clone()
    }
}

fn insert_into(state: &mut MemoryState, date: NaiveDate, description: &str) -> EventRecord {
    state.next_id += 1;
    let now = Utc::now();
    let record = EventRecord {
        id: state.next_id,
        date,
        description: description.to_string(),
        created_at: now,
        modified_at: now,
    };
    state.records.push(record.clone());
    record
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn begin(&self) -> Result<Box<dyn EventTransaction>> {
        let staged = self.state.lock().await.clone();
        Ok(Box::new(MemoryEventTransaction {
            shared: Arc::clone(&self.state),
            staged,
        }))
    }

    async fn events_on_day(&self, day: TargetDay) -> Result<Vec<EventRecord>> {
        let state = self.state.lock().await;
        let mut records: Vec<_> = state
            .records
            .iter()
            .filter(|r| day.matches(r.date))
            .cloned()
            .collect();
        records.sort_by_key(|r| (r.date, r.id));
        Ok(records)
    }
}

pub struct MemoryEventTransaction {
    shared: Arc<Mutex<MemoryState>>,
    staged: MemoryState,
}

#[async_trait]
impl EventTransaction for MemoryEventTransaction {
    async fn events_on_day(&mut self, day: TargetDay) -> Result<Vec<EventRecord>> {
        let mut records: Vec<_> = self
            .staged
            .records
            .iter()
            .filter(|r| day.matches(r.date))
            .cloned()
            .collect();
        records.sort_by_key(|r| r.id);
        Ok(records)
    }

    async fn events_on_date(&mut self, date: NaiveDate) -> Result<Vec<EventRecord>> {
        Ok(self
            .staged
            .records
            .iter()
            .filter(|r| r.date == date)
            .cloned()
            .collect())
    }

    async fn insert(&mut self, date: NaiveDate, description: &str) -> Result<EventRecord> {
        Ok(insert_into(&mut self.staged, date, description))
    }

    async fn update_description(&mut self, id: EventId, description: &str) -> Result<()> {
        let record = self
            .staged
            .records
            .iter_mut()
            .find(|r| r.id == id)
            .with_context(|| format!("no event with id {id}"))?;
        record.description = description.to_string();
        record.modified_at = Utc::now();
        Ok(())
    }

    async fn delete(&mut self, ids: &[EventId]) -> Result<u64> {
        let before = self.staged.records.len();
        self.staged.records.retain(|r| !ids.contains(&r.id));
        Ok((before - self.staged.records.len()) as u64)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut shared = self.shared.lock().await;
        *shared = self.staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
