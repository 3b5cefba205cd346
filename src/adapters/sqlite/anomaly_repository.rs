//! SQLite implementation of AnomalyScoreRepository: the append-only
//! composite-score history and the rolling-window monitor-anomaly log.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::error::{DomainError, DomainResult};
use crate::domain::models::{AnomalyComponents, AnomalyScore, AnomalyType, MonitorAnomaly, Severity};
use crate::domain::ports::AnomalyScoreRepository;

use super::{parse_datetime, parse_json, parse_optional_datetime, parse_uuid};

#[derive(Clone)]
pub struct SqliteAnomalyScoreRepository {
    pool: SqlitePool,
}

impl SqliteAnomalyScoreRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AnomalyScoreRepository for SqliteAnomalyScoreRepository {
    async fn insert_score(&self, score: &AnomalyScore) -> DomainResult<()> {
        sqlx::query(
            "INSERT INTO anomaly_scores (id, agent_id, latency, error_rate, resource_skew,
             queue_impact, composite, is_anomalous, evaluated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(score.id.to_string())
        .bind(score.agent_id.to_string())
        .bind(score.components.latency)
        .bind(score.components.error_rate)
        .bind(score.components.resource_skew)
        .bind(score.components.queue_impact)
        .bind(score.composite)
        .bind(score.is_anomalous)
        .bind(score.evaluated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn latest_for_agent(&self, agent_id: Uuid) -> DomainResult<Option<AnomalyScore>> {
        let row: Option<AnomalyScoreRow> = sqlx::query_as(
            "SELECT * FROM anomaly_scores WHERE agent_id = ? ORDER BY evaluated_at DESC LIMIT 1",
        )
        .bind(agent_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn insert_monitor_anomaly(&self, anomaly: &MonitorAnomaly) -> DomainResult<()> {
        let labels = serde_json::to_string(&anomaly.labels)?;
        sqlx::query(
            "INSERT INTO monitor_anomalies (id, metric_name, anomaly_type, severity, baseline_value,
             observed_value, deviation_percent, labels, detected_at, acknowledged_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(anomaly.id.to_string())
        .bind(&anomaly.metric_name)
        .bind(anomaly.anomaly_type.as_str())
        .bind(anomaly.severity.as_str())
        .bind(anomaly.baseline_value)
        .bind(anomaly.observed_value)
        .bind(anomaly.deviation_percent)
        .bind(&labels)
        .bind(anomaly.detected_at.to_rfc3339())
        .bind(anomaly.acknowledged_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_monitor_anomalies(&self, metric_name: Option<&str>) -> DomainResult<Vec<MonitorAnomaly>> {
        let rows: Vec<MonitorAnomalyRow> = match metric_name {
            Some(name) => {
                sqlx::query_as("SELECT * FROM monitor_anomalies WHERE metric_name = ? ORDER BY detected_at DESC")
                    .bind(name)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => sqlx::query_as("SELECT * FROM monitor_anomalies ORDER BY detected_at DESC")
                .fetch_all(&self.pool)
                .await?,
        };
        rows.into_iter().map(TryInto::try_into).collect()
    }
}

#[derive(sqlx::FromRow)]
struct AnomalyScoreRow {
    id: String,
    agent_id: String,
    latency: f64,
    error_rate: f64,
    resource_skew: f64,
    queue_impact: f64,
    composite: f64,
    is_anomalous: bool,
    evaluated_at: String,
}

impl TryFrom<AnomalyScoreRow> for AnomalyScore {
    type Error = DomainError;

    fn try_from(row: AnomalyScoreRow) -> DomainResult<Self> {
        Ok(AnomalyScore {
            id: parse_uuid(&row.id)?,
            agent_id: parse_uuid(&row.agent_id)?,
            components: AnomalyComponents {
                latency: row.latency,
                error_rate: row.error_rate,
                resource_skew: row.resource_skew,
                queue_impact: row.queue_impact,
            },
            composite: row.composite,
            is_anomalous: row.is_anomalous,
            evaluated_at: parse_datetime(&row.evaluated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct MonitorAnomalyRow {
    id: String,
    metric_name: String,
    anomaly_type: String,
    severity: String,
    baseline_value: f64,
    observed_value: f64,
    deviation_percent: f64,
    labels: String,
    detected_at: String,
    acknowledged_at: Option<String>,
}

impl TryFrom<MonitorAnomalyRow> for MonitorAnomaly {
    type Error = DomainError;

    fn try_from(row: MonitorAnomalyRow) -> DomainResult<Self> {
        Ok(MonitorAnomaly {
            id: parse_uuid(&row.id)?,
            metric_name: row.metric_name,
            anomaly_type: AnomalyType::from_str(&row.anomaly_type)
                .ok_or_else(|| DomainError::SerializationError(format!("unknown anomaly type {}", row.anomaly_type)))?,
            severity: Severity::from_str(&row.severity)
                .ok_or_else(|| DomainError::SerializationError(format!("unknown severity {}", row.severity)))?,
            baseline_value: row.baseline_value,
            observed_value: row.observed_value,
            deviation_percent: row.deviation_percent,
            labels: parse_json(&row.labels)?,
            detected_at: parse_datetime(&row.detected_at)?,
            acknowledged_at: parse_optional_datetime(row.acknowledged_at)?,
        })
    }
}
