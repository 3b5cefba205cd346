//! SQLite implementation of TicketRepository.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::error::{DomainError, DomainResult};
use crate::domain::models::{Priority, Ticket, TicketEstimate, TicketStatus};
use crate::domain::ports::TicketRepository;

use super::{parse_datetime, parse_uuid};

#[derive(Clone)]
pub struct SqliteTicketRepository {
    pool: SqlitePool,
}

impl SqliteTicketRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TicketRepository for SqliteTicketRepository {
    async fn insert(&self, ticket: &Ticket) -> DomainResult<()> {
        sqlx::query(
            "INSERT INTO tickets (id, title, description, phase_id, status, priority,
             project_id, estimate, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(ticket.id.to_string())
        .bind(&ticket.title)
        .bind(&ticket.description)
        .bind(&ticket.phase_id)
        .bind(ticket.status.as_str())
        .bind(ticket.priority.as_str())
        .bind(&ticket.project_id)
        .bind(ticket.estimate.map(|e| e.as_str()))
        .bind(ticket.created_at.to_rfc3339())
        .bind(ticket.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<Ticket>> {
        let row: Option<TicketRow> = sqlx::query_as("SELECT * FROM tickets WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn update(&self, ticket: &Ticket) -> DomainResult<()> {
        let result = sqlx::query(
            "UPDATE tickets SET title = ?, description = ?, phase_id = ?, status = ?,
             priority = ?, project_id = ?, estimate = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&ticket.title)
        .bind(&ticket.description)
        .bind(&ticket.phase_id)
        .bind(ticket.status.as_str())
        .bind(ticket.priority.as_str())
        .bind(&ticket.project_id)
        .bind(ticket.estimate.map(|e| e.as_str()))
        .bind(ticket.updated_at.to_rfc3339())
        .bind(ticket.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::TicketNotFound(ticket.id));
        }
        Ok(())
    }

    async fn list(&self, status: Option<TicketStatus>) -> DomainResult<Vec<Ticket>> {
        let rows: Vec<TicketRow> = match status {
            Some(status) => {
                sqlx::query_as("SELECT * FROM tickets WHERE status = ? ORDER BY created_at DESC")
                    .bind(status.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => sqlx::query_as("SELECT * FROM tickets ORDER BY created_at DESC").fetch_all(&self.pool).await?,
        };
        rows.into_iter().map(TryInto::try_into).collect()
    }
}

#[derive(sqlx::FromRow)]
struct TicketRow {
    id: String,
    title: String,
    description: String,
    phase_id: Option<String>,
    status: String,
    priority: String,
    project_id: Option<String>,
    estimate: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<TicketRow> for Ticket {
    type Error = DomainError;

    fn try_from(row: TicketRow) -> DomainResult<Self> {
        Ok(Ticket {
            id: parse_uuid(&row.id)?,
            title: row.title,
            description: row.description,
            phase_id: row.phase_id,
            status: TicketStatus::from_str(&row.status)
                .ok_or_else(|| DomainError::SerializationError(format!("unknown ticket status {}", row.status)))?,
            priority: Priority::from_str(&row.priority)
                .ok_or_else(|| DomainError::SerializationError(format!("unknown priority {}", row.priority)))?,
            project_id: row.project_id,
            estimate: row.estimate.and_then(|e| TicketEstimate::from_str(&e)),
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}
