//! SQLite implementation of LockRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::error::{DomainError, DomainResult};
use crate::domain::models::{LockMode, ResourceLock};
use crate::domain::ports::LockRepository;

use super::{parse_datetime, parse_optional_datetime, parse_uuid};

#[derive(Clone)]
pub struct SqliteLockRepository {
    pool: SqlitePool,
}

impl SqliteLockRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LockRepository for SqliteLockRepository {
    async fn insert(&self, lock: &ResourceLock) -> DomainResult<()> {
        sqlx::query(
            "INSERT INTO resource_locks (id, resource_type, resource_id, resource_key,
             locked_by_task_id, locked_by_agent_id, lock_mode, acquired_at, expires_at,
             released_at, version)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(lock.id.to_string())
        .bind(&lock.resource_type)
        .bind(&lock.resource_id)
        .bind(lock.resource_key())
        .bind(lock.locked_by_task_id.to_string())
        .bind(lock.locked_by_agent_id.to_string())
        .bind(lock.lock_mode.as_str())
        .bind(lock.acquired_at.to_rfc3339())
        .bind(lock.expires_at.map(|t| t.to_rfc3339()))
        .bind(lock.released_at.map(|t| t.to_rfc3339()))
        .bind(lock.version as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<ResourceLock>> {
        let row: Option<LockRow> = sqlx::query_as("SELECT * FROM resource_locks WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn update(&self, lock: &ResourceLock) -> DomainResult<()> {
        let previous_version = lock.version.saturating_sub(1) as i64;

        let result = sqlx::query(
            "UPDATE resource_locks SET expires_at = ?, released_at = ?, version = ?
             WHERE id = ? AND version = ?",
        )
        .bind(lock.expires_at.map(|t| t.to_rfc3339()))
        .bind(lock.released_at.map(|t| t.to_rfc3339()))
        .bind(lock.version as i64)
        .bind(lock.id.to_string())
        .bind(previous_version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::ConcurrencyConflict { entity: "lock", id: lock.id.to_string() });
        }
        Ok(())
    }

    async fn active_for_resource(&self, resource_type: &str, resource_id: &str) -> DomainResult<Vec<ResourceLock>> {
        let resource_key = format!("{resource_type}:{resource_id}");
        let rows: Vec<LockRow> = sqlx::query_as(
            "SELECT * FROM resource_locks WHERE resource_key = ? AND released_at IS NULL ORDER BY acquired_at ASC",
        )
        .bind(resource_key)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn active_for_task(&self, task_id: Uuid) -> DomainResult<Vec<ResourceLock>> {
        let rows: Vec<LockRow> = sqlx::query_as(
            "SELECT * FROM resource_locks WHERE locked_by_task_id = ? AND released_at IS NULL",
        )
        .bind(task_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_active(&self) -> DomainResult<Vec<ResourceLock>> {
        let rows: Vec<LockRow> =
            sqlx::query_as("SELECT * FROM resource_locks WHERE released_at IS NULL ORDER BY acquired_at ASC")
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_expired(&self, now: DateTime<Utc>) -> DomainResult<Vec<ResourceLock>> {
        let rows: Vec<LockRow> = sqlx::query_as(
            "SELECT * FROM resource_locks WHERE released_at IS NULL AND expires_at IS NOT NULL AND expires_at <= ?",
        )
        .bind(now.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}

#[derive(sqlx::FromRow)]
struct LockRow {
    id: String,
    resource_type: String,
    resource_id: String,
    locked_by_task_id: String,
    locked_by_agent_id: String,
    lock_mode: String,
    acquired_at: String,
    expires_at: Option<String>,
    released_at: Option<String>,
    version: i64,
}

impl TryFrom<LockRow> for ResourceLock {
    type Error = DomainError;

    fn try_from(row: LockRow) -> DomainResult<Self> {
        Ok(ResourceLock {
            id: parse_uuid(&row.id)?,
            resource_type: row.resource_type,
            resource_id: row.resource_id,
            locked_by_task_id: parse_uuid(&row.locked_by_task_id)?,
            locked_by_agent_id: parse_uuid(&row.locked_by_agent_id)?,
            lock_mode: LockMode::from_str(&row.lock_mode)
                .ok_or_else(|| DomainError::SerializationError(format!("unknown lock mode {}", row.lock_mode)))?,
            acquired_at: parse_datetime(&row.acquired_at)?,
            expires_at: parse_optional_datetime(row.expires_at)?,
            released_at: parse_optional_datetime(row.released_at)?,
            version: row.version as u64,
        })
    }
}
