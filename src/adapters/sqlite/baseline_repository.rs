//! SQLite implementation of BaselineRepository, keyed by `(agent_type, phase_id)`.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::domain::error::{DomainError, DomainResult};
use crate::domain::models::{AgentBaseline, BaselineKey};
use crate::domain::ports::BaselineRepository;

use super::{parse_datetime, parse_json};

#[derive(Clone)]
pub struct SqliteBaselineRepository {
    pool: SqlitePool,
}

impl SqliteBaselineRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// `phase_id` is stored as `''` rather than `NULL` so the table's composite
/// primary key stays usable (SQLite treats `NULL` as distinct from itself).
fn phase_column(phase_id: &Option<String>) -> String {
    phase_id.clone().unwrap_or_default()
}

#[async_trait]
impl BaselineRepository for SqliteBaselineRepository {
    async fn get(&self, key: &BaselineKey) -> DomainResult<Option<AgentBaseline>> {
        let row: Option<BaselineRow> =
            sqlx::query_as("SELECT * FROM agent_baselines WHERE agent_type = ? AND phase_id = ?")
                .bind(&key.agent_type)
                .bind(phase_column(&key.phase_id))
                .fetch_optional(&self.pool)
                .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn upsert(&self, baseline: &AgentBaseline) -> DomainResult<()> {
        let additional_metrics = serde_json::to_string(&baseline.additional_metrics)?;
        sqlx::query(
            "INSERT INTO agent_baselines (agent_type, phase_id, latency_ms, latency_std, error_rate,
             cpu_usage_percent, memory_usage_mb, additional_metrics, sample_count, last_updated)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (agent_type, phase_id) DO UPDATE SET
                latency_ms = excluded.latency_ms,
                latency_std = excluded.latency_std,
                error_rate = excluded.error_rate,
                cpu_usage_percent = excluded.cpu_usage_percent,
                memory_usage_mb = excluded.memory_usage_mb,
                additional_metrics = excluded.additional_metrics,
                sample_count = excluded.sample_count,
                last_updated = excluded.last_updated",
        )
        .bind(&baseline.agent_type)
        .bind(phase_column(&baseline.phase_id))
        .bind(baseline.latency_ms)
        .bind(baseline.latency_std)
        .bind(baseline.error_rate)
        .bind(baseline.cpu_usage_percent)
        .bind(baseline.memory_usage_mb)
        .bind(&additional_metrics)
        .bind(baseline.sample_count as i64)
        .bind(baseline.last_updated.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list(&self) -> DomainResult<Vec<AgentBaseline>> {
        let rows: Vec<BaselineRow> = sqlx::query_as("SELECT * FROM agent_baselines ORDER BY agent_type, phase_id")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}

#[derive(sqlx::FromRow)]
struct BaselineRow {
    agent_type: String,
    phase_id: String,
    latency_ms: f64,
    latency_std: f64,
    error_rate: f64,
    cpu_usage_percent: f64,
    memory_usage_mb: f64,
    additional_metrics: String,
    sample_count: i64,
    last_updated: String,
}

impl TryFrom<BaselineRow> for AgentBaseline {
    type Error = DomainError;

    fn try_from(row: BaselineRow) -> DomainResult<Self> {
        Ok(AgentBaseline {
            agent_type: row.agent_type,
            phase_id: if row.phase_id.is_empty() { None } else { Some(row.phase_id) },
            latency_ms: row.latency_ms,
            latency_std: row.latency_std,
            error_rate: row.error_rate,
            cpu_usage_percent: row.cpu_usage_percent,
            memory_usage_mb: row.memory_usage_mb,
            additional_metrics: parse_json(&row.additional_metrics)?,
            sample_count: row.sample_count as u64,
            last_updated: parse_datetime(&row.last_updated)?,
        })
    }
}
