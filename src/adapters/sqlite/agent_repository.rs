//! SQLite implementation of AgentRepository.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::error::{DomainError, DomainResult};
use crate::domain::models::{Agent, AgentStatus};
use crate::domain::ports::AgentRepository;

use super::retry::with_retry;
use super::{parse_datetime, parse_json, parse_optional_datetime, parse_uuid};

#[derive(Clone)]
pub struct SqliteAgentRepository {
    pool: SqlitePool,
}

impl SqliteAgentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AgentRepository for SqliteAgentRepository {
    async fn insert(&self, agent: &Agent) -> DomainResult<()> {
        let capabilities = serde_json::to_string(&agent.capabilities)?;
        sqlx::query(
            "INSERT INTO agents (id, agent_type, phase_id, status, capabilities, conversation_id,
             workspace_dir, last_heartbeat, anomaly_score, consecutive_anomalous_readings,
             created_at, updated_at, version)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(agent.id.to_string())
        .bind(&agent.agent_type)
        .bind(&agent.phase_id)
        .bind(agent.status.as_str())
        .bind(&capabilities)
        .bind(&agent.conversation_id)
        .bind(&agent.workspace_dir)
        .bind(agent.last_heartbeat.map(|t| t.to_rfc3339()))
        .bind(agent.anomaly_score)
        .bind(agent.consecutive_anomalous_readings as i64)
        .bind(agent.created_at.to_rfc3339())
        .bind(agent.updated_at.to_rfc3339())
        .bind(agent.version as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<Agent>> {
        let row: Option<AgentRow> = sqlx::query_as("SELECT * FROM agents WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn update(&self, agent: &Agent) -> DomainResult<()> {
        let capabilities = serde_json::to_string(&agent.capabilities)?;
        let previous_version = agent.version.saturating_sub(1) as i64;

        with_retry(|| async {
            let result = sqlx::query(
                "UPDATE agents SET agent_type = ?, phase_id = ?, status = ?, capabilities = ?,
                 conversation_id = ?, workspace_dir = ?, last_heartbeat = ?, anomaly_score = ?,
                 consecutive_anomalous_readings = ?, updated_at = ?, version = ?
                 WHERE id = ? AND version = ?",
            )
            .bind(&agent.agent_type)
            .bind(&agent.phase_id)
            .bind(agent.status.as_str())
            .bind(&capabilities)
            .bind(&agent.conversation_id)
            .bind(&agent.workspace_dir)
            .bind(agent.last_heartbeat.map(|t| t.to_rfc3339()))
            .bind(agent.anomaly_score)
            .bind(agent.consecutive_anomalous_readings as i64)
            .bind(agent.updated_at.to_rfc3339())
            .bind(agent.version as i64)
            .bind(agent.id.to_string())
            .bind(previous_version)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(DomainError::ConcurrencyConflict { entity: "agent", id: agent.id.to_string() });
            }
            Ok(())
        })
        .await
    }

    async fn list(&self, status: Option<AgentStatus>) -> DomainResult<Vec<Agent>> {
        let rows: Vec<AgentRow> = match status {
            Some(status) => sqlx::query_as("SELECT * FROM agents WHERE status = ? ORDER BY updated_at ASC")
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?,
            None => sqlx::query_as("SELECT * FROM agents ORDER BY updated_at ASC").fetch_all(&self.pool).await?,
        };
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn find_idle_matching(&self, required_caps: &[String], phase_id: Option<&str>) -> DomainResult<Vec<Agent>> {
        let rows: Vec<AgentRow> = sqlx::query_as("SELECT * FROM agents WHERE status = 'idle' ORDER BY updated_at ASC")
            .fetch_all(&self.pool)
            .await?;
        let agents: Vec<Agent> = rows.into_iter().map(TryInto::try_into).collect::<DomainResult<_>>()?;
        Ok(agents.into_iter().filter(|a| a.can_serve(required_caps, phase_id)).collect())
    }

    async fn find_stale(&self, heartbeat_threshold_secs: i64) -> DomainResult<Vec<Agent>> {
        let rows: Vec<AgentRow> = sqlx::query_as(
            "SELECT * FROM agents WHERE status IN ('idle', 'running', 'degraded') ORDER BY updated_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        let agents: Vec<Agent> = rows.into_iter().map(TryInto::try_into).collect::<DomainResult<_>>()?;
        let now = Utc::now();
        Ok(agents.into_iter().filter(|a| a.is_heartbeat_stale(now, heartbeat_threshold_secs)).collect())
    }
}

#[derive(sqlx::FromRow)]
struct AgentRow {
    id: String,
    agent_type: String,
    phase_id: Option<String>,
    status: String,
    capabilities: String,
    conversation_id: Option<String>,
    workspace_dir: Option<String>,
    last_heartbeat: Option<String>,
    anomaly_score: f64,
    consecutive_anomalous_readings: i64,
    created_at: String,
    updated_at: String,
    version: i64,
}

impl TryFrom<AgentRow> for Agent {
    type Error = DomainError;

    fn try_from(row: AgentRow) -> DomainResult<Self> {
        Ok(Agent {
            id: parse_uuid(&row.id)?,
            agent_type: row.agent_type,
            phase_id: row.phase_id,
            status: AgentStatus::from_str(&row.status)
                .ok_or_else(|| DomainError::SerializationError(format!("unknown agent status {}", row.status)))?,
            capabilities: parse_json(&row.capabilities)?,
            conversation_id: row.conversation_id,
            workspace_dir: row.workspace_dir,
            last_heartbeat: parse_optional_datetime(row.last_heartbeat)?,
            anomaly_score: row.anomaly_score,
            consecutive_anomalous_readings: row.consecutive_anomalous_readings as u32,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
            version: row.version as u64,
        })
    }
}
