//! SQLite implementation of CollaborationRepository: threads keyed through a
//! `thread_participants` join table, plus the messages within each thread.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::error::{DomainError, DomainResult};
use crate::domain::models::{AgentMessage, CollaborationThread, DeliveryMode, ThreadStatus, ThreadType};
use crate::domain::ports::CollaborationRepository;

use super::{parse_datetime, parse_optional_datetime, parse_optional_uuid, parse_uuid};

#[derive(Clone)]
pub struct SqliteCollaborationRepository {
    pool: SqlitePool,
}

impl SqliteCollaborationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn load_participants(&self, thread_id: Uuid) -> DomainResult<Vec<Uuid>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT agent_id FROM thread_participants WHERE thread_id = ?")
                .bind(thread_id.to_string())
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(|(id,)| parse_uuid(&id)).collect()
    }
}

#[async_trait]
impl CollaborationRepository for SqliteCollaborationRepository {
    async fn insert_thread(&self, thread: &CollaborationThread) -> DomainResult<()> {
        sqlx::query(
            "INSERT INTO collaboration_threads (id, thread_type, ticket_id, task_id, status,
             closed_at, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(thread.id.to_string())
        .bind(thread.thread_type.as_str())
        .bind(thread.ticket_id.map(|id| id.to_string()))
        .bind(thread.task_id.map(|id| id.to_string()))
        .bind(thread.status.as_str())
        .bind(thread.closed_at.map(|t| t.to_rfc3339()))
        .bind(thread.created_at.to_rfc3339())
        .bind(thread.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        for participant in &thread.participants {
            sqlx::query("INSERT OR IGNORE INTO thread_participants (thread_id, agent_id) VALUES (?, ?)")
                .bind(thread.id.to_string())
                .bind(participant.to_string())
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    async fn get_thread(&self, id: Uuid) -> DomainResult<Option<CollaborationThread>> {
        let row: Option<ThreadRow> = sqlx::query_as("SELECT * FROM collaboration_threads WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let participants = self.load_participants(id).await?;
                Ok(Some(row.into_thread(participants)?))
            }
            None => Ok(None),
        }
    }

    async fn update_thread(&self, thread: &CollaborationThread) -> DomainResult<()> {
        let result = sqlx::query(
            "UPDATE collaboration_threads SET status = ?, closed_at = ?, updated_at = ? WHERE id = ?",
        )
        .bind(thread.status.as_str())
        .bind(thread.closed_at.map(|t| t.to_rfc3339()))
        .bind(thread.updated_at.to_rfc3339())
        .bind(thread.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::ThreadNotFound(thread.id));
        }

        for participant in &thread.participants {
            sqlx::query("INSERT OR IGNORE INTO thread_participants (thread_id, agent_id) VALUES (?, ?)")
                .bind(thread.id.to_string())
                .bind(participant.to_string())
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    async fn find_thread_for_participants(&self, participants: &[Uuid]) -> DomainResult<Option<CollaborationThread>> {
        let rows: Vec<ThreadRow> = sqlx::query_as(
            "SELECT * FROM collaboration_threads WHERE status = 'active' ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        for row in rows {
            let thread_id = parse_uuid(&row.id)?;
            let thread_participants = self.load_participants(thread_id).await?;
            let same_set = thread_participants.len() == participants.len()
                && participants.iter().all(|p| thread_participants.contains(p));
            if same_set {
                return Ok(Some(row.into_thread(thread_participants)?));
            }
        }
        Ok(None)
    }

    async fn insert_message(&self, message: &AgentMessage) -> DomainResult<()> {
        let metadata = message.metadata.as_ref().map(serde_json::Value::to_string);
        sqlx::query(
            "INSERT INTO agent_messages (id, thread_id, from_agent_id, to_agent_id, message_type,
             content, metadata, read_at, delivery_mode, delivered_at, delivery_error, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(message.id.to_string())
        .bind(message.thread_id.to_string())
        .bind(message.from_agent_id.to_string())
        .bind(message.to_agent_id.map(|id| id.to_string()))
        .bind(&message.message_type)
        .bind(&message.content)
        .bind(&metadata)
        .bind(message.read_at.map(|t| t.to_rfc3339()))
        .bind(message.delivery_mode.map(|m| m.as_str()))
        .bind(message.delivered_at.map(|t| t.to_rfc3339()))
        .bind(&message.delivery_error)
        .bind(message.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_message(&self, message: &AgentMessage) -> DomainResult<()> {
        let result = sqlx::query(
            "UPDATE agent_messages SET read_at = ?, delivery_mode = ?, delivered_at = ?, delivery_error = ?
             WHERE id = ?",
        )
        .bind(message.read_at.map(|t| t.to_rfc3339()))
        .bind(message.delivery_mode.map(|m| m.as_str()))
        .bind(message.delivered_at.map(|t| t.to_rfc3339()))
        .bind(&message.delivery_error)
        .bind(message.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::ValidationFailed(format!("message not found: {}", message.id)));
        }
        Ok(())
    }

    async fn list_messages(&self, thread_id: Uuid) -> DomainResult<Vec<AgentMessage>> {
        let rows: Vec<MessageRow> =
            sqlx::query_as("SELECT * FROM agent_messages WHERE thread_id = ? ORDER BY created_at ASC")
                .bind(thread_id.to_string())
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}

#[derive(sqlx::FromRow)]
struct ThreadRow {
    id: String,
    thread_type: String,
    ticket_id: Option<String>,
    task_id: Option<String>,
    status: String,
    closed_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl ThreadRow {
    fn into_thread(self, participants: Vec<Uuid>) -> DomainResult<CollaborationThread> {
        Ok(CollaborationThread {
            id: parse_uuid(&self.id)?,
            thread_type: ThreadType::from_str(&self.thread_type)
                .ok_or_else(|| DomainError::SerializationError(format!("unknown thread type {}", self.thread_type)))?,
            participants,
            ticket_id: parse_optional_uuid(self.ticket_id)?,
            task_id: parse_optional_uuid(self.task_id)?,
            status: ThreadStatus::from_str(&self.status)
                .ok_or_else(|| DomainError::SerializationError(format!("unknown thread status {}", self.status)))?,
            closed_at: parse_optional_datetime(self.closed_at)?,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: String,
    thread_id: String,
    from_agent_id: String,
    to_agent_id: Option<String>,
    message_type: String,
    content: String,
    metadata: Option<String>,
    read_at: Option<String>,
    delivery_mode: Option<String>,
    delivered_at: Option<String>,
    delivery_error: Option<String>,
    created_at: String,
}

impl TryFrom<MessageRow> for AgentMessage {
    type Error = DomainError;

    fn try_from(row: MessageRow) -> DomainResult<Self> {
        Ok(AgentMessage {
            id: parse_uuid(&row.id)?,
            thread_id: parse_uuid(&row.thread_id)?,
            from_agent_id: parse_uuid(&row.from_agent_id)?,
            to_agent_id: parse_optional_uuid(row.to_agent_id)?,
            message_type: row.message_type,
            content: row.content,
            metadata: row.metadata.map(|m| serde_json::from_str(&m)).transpose()?,
            read_at: parse_optional_datetime(row.read_at)?,
            delivery_mode: row.delivery_mode.and_then(|m| DeliveryMode::from_str(&m)),
            delivered_at: parse_optional_datetime(row.delivered_at)?,
            delivery_error: row.delivery_error,
            created_at: parse_datetime(&row.created_at)?,
        })
    }
}
