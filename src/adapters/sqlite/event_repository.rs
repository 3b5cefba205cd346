//! SQLite implementation of EventRepository: the append-only audit trail.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::error::{DomainError, DomainResult};
use crate::domain::models::{Event, EventType};
use crate::domain::ports::EventRepository;

use super::{parse_datetime, parse_uuid};

#[derive(Clone)]
pub struct SqliteEventRepository {
    pool: SqlitePool,
}

impl SqliteEventRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventRepository for SqliteEventRepository {
    async fn insert(&self, event: &Event) -> DomainResult<()> {
        sqlx::query(
            "INSERT INTO events (id, event_type, entity_type, entity_id, payload, timestamp)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(event.id.to_string())
        .bind(event.event_type.as_str())
        .bind(&event.entity_type)
        .bind(event.entity_id.to_string())
        .bind(event.payload.to_string())
        .bind(event.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_for_entity(&self, entity_id: Uuid) -> DomainResult<Vec<Event>> {
        let rows: Vec<EventRow> =
            sqlx::query_as("SELECT * FROM events WHERE entity_id = ? ORDER BY timestamp ASC")
                .bind(entity_id.to_string())
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_recent(&self, limit: u32) -> DomainResult<Vec<Event>> {
        let rows: Vec<EventRow> = sqlx::query_as("SELECT * FROM events ORDER BY timestamp DESC LIMIT ?")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: String,
    event_type: String,
    entity_type: String,
    entity_id: String,
    payload: String,
    timestamp: String,
}

impl TryFrom<EventRow> for Event {
    type Error = DomainError;

    fn try_from(row: EventRow) -> DomainResult<Self> {
        Ok(Event {
            id: parse_uuid(&row.id)?,
            event_type: EventType::from_str(&row.event_type)
                .ok_or_else(|| DomainError::SerializationError(format!("unknown event type {}", row.event_type)))?,
            entity_type: row.entity_type,
            entity_id: parse_uuid(&row.entity_id)?,
            payload: serde_json::from_str(&row.payload)?,
            timestamp: parse_datetime(&row.timestamp)?,
        })
    }
}
