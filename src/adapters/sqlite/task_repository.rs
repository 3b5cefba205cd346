//! SQLite implementation of TaskRepository, including the normalized
//! `task_dependencies` edge table (spec §4.A, §9).

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::error::{DomainError, DomainResult};
use crate::domain::models::{Priority, ResourceRequirement, Task, TaskStatus};
use crate::domain::ports::TaskRepository;

use super::retry::with_retry;
use super::{parse_datetime, parse_json, parse_optional_datetime, parse_optional_uuid, parse_uuid};

#[derive(Clone)]
pub struct SqliteTaskRepository {
    pool: SqlitePool,
}

impl SqliteTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn load_dependencies(&self, task: &mut Task) -> DomainResult<()> {
        task.depends_on = self.depends_on(task.id).await?;
        Ok(())
    }
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    async fn insert(&self, task: &Task, depends_on: &[Uuid]) -> DomainResult<()> {
        let required_caps = serde_json::to_string(&task.required_caps)?;
        let required_resources = serde_json::to_string(&task.required_resources)?;

        sqlx::query(
            "INSERT INTO tasks (id, ticket_id, phase_id, task_type, title, description, priority,
             status, assigned_agent_id, sandbox_id, conversation_id, persistence_dir, started_at,
             completed_at, deadline, retry_count, max_retries, result, required_caps,
             required_resources, priority_score, created_at, updated_at, version)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(task.id.to_string())
        .bind(task.ticket_id.to_string())
        .bind(&task.phase_id)
        .bind(&task.task_type)
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.priority.as_str())
        .bind(task.status.as_str())
        .bind(task.assigned_agent_id.map(|id| id.to_string()))
        .bind(&task.sandbox_id)
        .bind(&task.conversation_id)
        .bind(&task.persistence_dir)
        .bind(task.started_at.map(|t| t.to_rfc3339()))
        .bind(task.completed_at.map(|t| t.to_rfc3339()))
        .bind(task.deadline.map(|t| t.to_rfc3339()))
        .bind(task.retry_count as i64)
        .bind(task.max_retries as i64)
        .bind(task.result.as_ref().map(serde_json::Value::to_string))
        .bind(&required_caps)
        .bind(&required_resources)
        .bind(task.priority_score)
        .bind(task.created_at.to_rfc3339())
        .bind(task.updated_at.to_rfc3339())
        .bind(task.version as i64)
        .execute(&self.pool)
        .await?;

        for dep in depends_on {
            sqlx::query("INSERT OR IGNORE INTO task_dependencies (task_id, depends_on_id) VALUES (?, ?)")
                .bind(task.id.to_string())
                .bind(dep.to_string())
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<Task>> {
        let row: Option<TaskRow> = sqlx::query_as("SELECT * FROM tasks WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let mut task: Task = row.try_into()?;
                self.load_dependencies(&mut task).await?;
                Ok(Some(task))
            }
            None => Ok(None),
        }
    }

    async fn update(&self, task: &Task) -> DomainResult<()> {
        let required_caps = serde_json::to_string(&task.required_caps)?;
        let required_resources = serde_json::to_string(&task.required_resources)?;
        let previous_version = task.version.saturating_sub(1) as i64;

        with_retry(|| async {
            let result = sqlx::query(
                "UPDATE tasks SET phase_id = ?, task_type = ?, title = ?, description = ?, priority = ?,
                 status = ?, assigned_agent_id = ?, sandbox_id = ?, conversation_id = ?,
                 persistence_dir = ?, started_at = ?, completed_at = ?, deadline = ?, retry_count = ?,
                 max_retries = ?, result = ?, required_caps = ?, required_resources = ?,
                 priority_score = ?, updated_at = ?, version = ?
                 WHERE id = ? AND version = ?",
            )
            .bind(&task.phase_id)
            .bind(&task.task_type)
            .bind(&task.title)
            .bind(&task.description)
            .bind(task.priority.as_str())
            .bind(task.status.as_str())
            .bind(task.assigned_agent_id.map(|id| id.to_string()))
            .bind(&task.sandbox_id)
            .bind(&task.conversation_id)
            .bind(&task.persistence_dir)
            .bind(task.started_at.map(|t| t.to_rfc3339()))
            .bind(task.completed_at.map(|t| t.to_rfc3339()))
            .bind(task.deadline.map(|t| t.to_rfc3339()))
            .bind(task.retry_count as i64)
            .bind(task.max_retries as i64)
            .bind(task.result.as_ref().map(serde_json::Value::to_string))
            .bind(&required_caps)
            .bind(&required_resources)
            .bind(task.priority_score)
            .bind(task.updated_at.to_rfc3339())
            .bind(task.version as i64)
            .bind(task.id.to_string())
            .bind(previous_version)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(DomainError::ConcurrencyConflict { entity: "task", id: task.id.to_string() });
            }
            Ok(())
        })
        .await
    }

    async fn depends_on(&self, task_id: Uuid) -> DomainResult<Vec<Uuid>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT depends_on_id FROM task_dependencies WHERE task_id = ?")
            .bind(task_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(|(id,)| parse_uuid(&id)).collect()
    }

    async fn dependents_of(&self, task_id: Uuid) -> DomainResult<Vec<Uuid>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT task_id FROM task_dependencies WHERE depends_on_id = ?")
            .bind(task_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(|(id,)| parse_uuid(&id)).collect()
    }

    async fn ready_set(&self) -> DomainResult<Vec<Task>> {
        let rows: Vec<TaskRow> = sqlx::query_as(
            "SELECT * FROM tasks t WHERE t.status = 'pending'
             AND NOT EXISTS (
                 SELECT 1 FROM task_dependencies d
                 JOIN tasks dep ON dep.id = d.depends_on_id
                 WHERE d.task_id = t.id AND dep.status != 'completed'
             )
             ORDER BY t.priority_score DESC, t.created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut tasks = Vec::with_capacity(rows.len());
        for row in rows {
            let mut task: Task = row.try_into()?;
            self.load_dependencies(&mut task).await?;
            tasks.push(task);
        }
        Ok(tasks)
    }

    async fn list_by_status(&self, status: TaskStatus) -> DomainResult<Vec<Task>> {
        let rows: Vec<TaskRow> = sqlx::query_as("SELECT * FROM tasks WHERE status = ? ORDER BY created_at DESC")
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;
        let mut tasks = Vec::with_capacity(rows.len());
        for row in rows {
            let mut task: Task = row.try_into()?;
            self.load_dependencies(&mut task).await?;
            tasks.push(task);
        }
        Ok(tasks)
    }

    async fn list_by_agent(&self, agent_id: Uuid, status: Option<TaskStatus>) -> DomainResult<Vec<Task>> {
        let rows: Vec<TaskRow> = match status {
            Some(status) => {
                sqlx::query_as("SELECT * FROM tasks WHERE assigned_agent_id = ? AND status = ? ORDER BY created_at DESC")
                    .bind(agent_id.to_string())
                    .bind(status.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => sqlx::query_as("SELECT * FROM tasks WHERE assigned_agent_id = ? ORDER BY created_at DESC")
                .bind(agent_id.to_string())
                .fetch_all(&self.pool)
                .await?,
        };
        let mut tasks = Vec::with_capacity(rows.len());
        for row in rows {
            let mut task: Task = row.try_into()?;
            self.load_dependencies(&mut task).await?;
            tasks.push(task);
        }
        Ok(tasks)
    }

    async fn list_by_ticket(&self, ticket_id: Uuid) -> DomainResult<Vec<Task>> {
        let rows: Vec<TaskRow> = sqlx::query_as("SELECT * FROM tasks WHERE ticket_id = ? ORDER BY created_at ASC")
            .bind(ticket_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        let mut tasks = Vec::with_capacity(rows.len());
        for row in rows {
            let mut task: Task = row.try_into()?;
            self.load_dependencies(&mut task).await?;
            tasks.push(task);
        }
        Ok(tasks)
    }
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: String,
    ticket_id: String,
    phase_id: Option<String>,
    task_type: String,
    title: String,
    description: String,
    priority: String,
    status: String,
    assigned_agent_id: Option<String>,
    sandbox_id: Option<String>,
    conversation_id: Option<String>,
    persistence_dir: Option<String>,
    started_at: Option<String>,
    completed_at: Option<String>,
    deadline: Option<String>,
    retry_count: i64,
    max_retries: i64,
    result: Option<String>,
    required_caps: String,
    required_resources: String,
    priority_score: f64,
    created_at: String,
    updated_at: String,
    version: i64,
}

impl TryFrom<TaskRow> for Task {
    type Error = DomainError;

    fn try_from(row: TaskRow) -> DomainResult<Self> {
        Ok(Task {
            id: parse_uuid(&row.id)?,
            ticket_id: parse_uuid(&row.ticket_id)?,
            phase_id: row.phase_id,
            task_type: row.task_type,
            title: row.title,
            description: row.description,
            priority: Priority::from_str(&row.priority)
                .ok_or_else(|| DomainError::SerializationError(format!("unknown priority {}", row.priority)))?,
            status: TaskStatus::from_str(&row.status)
                .ok_or_else(|| DomainError::SerializationError(format!("unknown task status {}", row.status)))?,
            assigned_agent_id: parse_optional_uuid(row.assigned_agent_id)?,
            sandbox_id: row.sandbox_id,
            conversation_id: row.conversation_id,
            persistence_dir: row.persistence_dir,
            started_at: parse_optional_datetime(row.started_at)?,
            completed_at: parse_optional_datetime(row.completed_at)?,
            deadline: parse_optional_datetime(row.deadline)?,
            retry_count: row.retry_count as u32,
            max_retries: row.max_retries as u32,
            result: row.result.map(|r| serde_json::from_str(&r)).transpose()?,
            depends_on: Vec::new(),
            required_caps: parse_json(&row.required_caps)?,
            required_resources: parse_json::<Vec<ResourceRequirement>>(&row.required_resources)?,
            priority_score: row.priority_score,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
            version: row.version as u64,
        })
    }
}
