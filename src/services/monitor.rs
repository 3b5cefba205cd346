//! Monitor service (spec §4.F).
//!
//! Runs on a fixed cadence. Each tick collects task/agent/lock metrics into
//! a bounded rolling history per metric name, flags rolling-stats outliers,
//! and separately re-scores every active agent's composite anomaly score,
//! updating `Agent.anomaly_score`/`consecutive_anomalous_readings` and
//! emitting `monitor.agent.anomaly` for agents at or above threshold.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::error::DomainResult;
use crate::domain::models::{Agent, AgentStatus, Event, EventType, HealthMetrics, LockMode, MonitorAnomaly};
use crate::domain::ports::{AgentRepository, AnomalyScoreRepository, BaselineRepository, LockRepository, TaskRepository};
use crate::infrastructure::config::{AnomalyConfig, MonitorConfig};
use crate::services::anomaly_scorer::AnomalyScorer;
use crate::services::event_bus::EventBus;

/// A bare scalar metric observation, queued onto this metric name's rolling
/// history.
struct MetricSample {
    name: &'static str,
    value: f64,
}

pub struct Monitor {
    monitor_config: MonitorConfig,
    anomaly_config: AnomalyConfig,
    task_repo: Arc<dyn TaskRepository>,
    agent_repo: Arc<dyn AgentRepository>,
    lock_repo: Arc<dyn LockRepository>,
    baseline_repo: Arc<dyn BaselineRepository>,
    anomaly_repo: Arc<dyn AnomalyScoreRepository>,
    anomaly_scorer: Arc<AnomalyScorer>,
    event_bus: EventBus,
    history: Mutex<HashMap<&'static str, VecDeque<f64>>>,
    /// Most recent heartbeat reading per agent, used as the AnomalyScorer's
    /// observed inputs. Fed by [`Monitor::record_heartbeat`]; not itself
    /// persisted, since the Store only durably tracks the learned baseline.
    latest_metrics: Mutex<HashMap<Uuid, HealthMetrics>>,
}

#[allow(clippy::too_many_arguments)]
impl Monitor {
    pub fn new(
        monitor_config: MonitorConfig,
        anomaly_config: AnomalyConfig,
        task_repo: Arc<dyn TaskRepository>,
        agent_repo: Arc<dyn AgentRepository>,
        lock_repo: Arc<dyn LockRepository>,
        baseline_repo: Arc<dyn BaselineRepository>,
        anomaly_repo: Arc<dyn AnomalyScoreRepository>,
        anomaly_scorer: Arc<AnomalyScorer>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            monitor_config,
            anomaly_config,
            task_repo,
            agent_repo,
            lock_repo,
            baseline_repo,
            anomaly_repo,
            anomaly_scorer,
            event_bus,
            history: Mutex::new(HashMap::new()),
            latest_metrics: Mutex::new(HashMap::new()),
        }
    }

    /// Records an agent's latest heartbeat reading and folds it into that
    /// agent's baseline. Called by the inbound heartbeat handler, ahead of
    /// the next `tick()`.
    pub async fn record_heartbeat(
        &self,
        agent: &Agent,
        metrics: HealthMetrics,
        baseline_learner: &crate::services::baseline_learner::BaselineLearner,
    ) -> DomainResult<()> {
        baseline_learner
            .learn(
                &agent.agent_type,
                agent.phase_id.clone(),
                metrics.latency_ms,
                metrics.latency_std,
                metrics.error_rate,
                metrics.cpu_usage_percent,
                metrics.memory_usage_mb,
                &metrics.additional_metrics,
            )
            .await?;
        self.latest_metrics.lock().await.insert(agent.id, metrics);
        Ok(())
    }

    /// One full monitor tick: rolling-window metric anomaly detection
    /// followed by per-agent composite anomaly scoring.
    pub async fn tick(&self) -> DomainResult<()> {
        let samples = self.collect_samples().await?;
        for sample in samples {
            self.observe(sample).await?;
        }
        self.score_agents().await?;
        Ok(())
    }

    async fn collect_samples(&self) -> DomainResult<Vec<MetricSample>> {
        let mut samples = Vec::new();

        let pending = self.task_repo.list_by_status(crate::domain::models::TaskStatus::Pending).await?;
        let running = self.task_repo.list_by_status(crate::domain::models::TaskStatus::Running).await?;
        let completed = self.task_repo.list_by_status(crate::domain::models::TaskStatus::Completed).await?;
        let failed = self.task_repo.list_by_status(crate::domain::models::TaskStatus::Failed).await?;

        samples.push(MetricSample { name: "task.pending_count", value: pending.len() as f64 });
        samples.push(MetricSample { name: "task.running_count", value: running.len() as f64 });

        let terminal = completed.len() + failed.len();
        if terminal > 0 {
            samples.push(MetricSample {
                name: "task.completion_rate",
                value: completed.len() as f64 / terminal as f64,
            });
        }

        let one_hour_ago = Utc::now() - chrono::Duration::hours(1);
        let recent_durations: Vec<f64> = completed
            .iter()
            .filter(|t| t.completed_at.is_some_and(|c| c >= one_hour_ago))
            .filter_map(|t| t.started_at.zip(t.completed_at))
            .map(|(start, end)| (end - start).num_milliseconds() as f64)
            .collect();
        if !recent_durations.is_empty() {
            let avg = recent_durations.iter().sum::<f64>() / recent_durations.len() as f64;
            samples.push(MetricSample { name: "task.avg_duration_ms", value: avg });
        }

        let agents = self.agent_repo.list(None).await?;
        let active_count = agents.iter().filter(|a| a.status != AgentStatus::Dead).count();
        samples.push(MetricSample { name: "agent.active_count", value: active_count as f64 });

        let now = Utc::now();
        let heartbeat_ages: Vec<f64> = agents
            .iter()
            .filter(|a| a.status != AgentStatus::Dead)
            .filter_map(|a| a.last_heartbeat)
            .map(|hb| (now - hb).num_seconds() as f64)
            .collect();
        if !heartbeat_ages.is_empty() {
            let avg = heartbeat_ages.iter().sum::<f64>() / heartbeat_ages.len() as f64;
            samples.push(MetricSample { name: "agent.avg_heartbeat_age_secs", value: avg });
        }

        let locks = self.lock_repo.list_active().await?;
        let exclusive = locks.iter().filter(|l| l.lock_mode == LockMode::Exclusive).count();
        let shared = locks.iter().filter(|l| l.lock_mode == LockMode::Shared).count();
        samples.push(MetricSample { name: "lock.active_exclusive_count", value: exclusive as f64 });
        samples.push(MetricSample { name: "lock.active_shared_count", value: shared as f64 });

        Ok(samples)
    }

    /// Appends `sample` to its metric's bounded rolling history; once at
    /// least 10 samples have accumulated, flags a rolling-stats outlier.
    async fn observe(&self, sample: MetricSample) -> DomainResult<()> {
        let mut history = self.history.lock().await;
        let window = history.entry(sample.name).or_insert_with(VecDeque::new);
        window.push_back(sample.value);
        while window.len() > self.monitor_config.rolling_history_cap {
            window.pop_front();
        }

        if window.len() < 10 {
            return Ok(());
        }

        let mean = window.iter().sum::<f64>() / window.len() as f64;
        let variance = window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / window.len() as f64;
        let std = variance.sqrt();
        drop(history);

        if std <= 0.0 {
            return Ok(());
        }
        let sigmas = (sample.value - mean) / std;
        if sigmas.abs() <= self.monitor_config.sensitivity {
            return Ok(());
        }

        let anomaly = MonitorAnomaly::new(sample.name, mean, sample.value, sigmas, HashMap::new());
        self.anomaly_repo.insert_monitor_anomaly(&anomaly).await?;
        self.event_bus
            .publish(Event::new(
                EventType::MonitorAnomalyDetected,
                "metric",
                anomaly.id,
                json!({
                    "metric_name": anomaly.metric_name,
                    "severity": anomaly.severity.as_str(),
                    "deviation_percent": anomaly.deviation_percent,
                }),
            ))
            .await?;
        info!(metric = sample.name, sigmas, severity = anomaly.severity.as_str(), "rolling-window anomaly detected");
        Ok(())
    }

    async fn score_agents(&self) -> DomainResult<()> {
        let agents = self.agent_repo.list(None).await?;
        let latest = self.latest_metrics.lock().await;

        for mut agent in agents.into_iter().filter(|a| a.status != AgentStatus::Dead) {
            let Some(metrics) = latest.get(&agent.id) else {
                continue;
            };
            let key = crate::domain::models::BaselineKey::new(agent.agent_type.clone(), agent.phase_id.clone());
            let baseline = self.baseline_repo.get(&key).await?;

            let components = self
                .anomaly_scorer
                .score(
                    agent.id,
                    baseline.as_ref(),
                    Some(metrics.latency_ms),
                    Some(metrics.error_rate),
                    Some(metrics.cpu_usage_percent),
                    Some(metrics.memory_usage_mb),
                )
                .await?;
            let score = crate::domain::models::AnomalyScore::new(agent.id, components);
            self.anomaly_repo.insert_score(&score).await?;

            agent.record_anomaly_reading(score.composite, self.anomaly_config.composite_threshold);
            self.agent_repo.update(&agent).await?;

            debug!(agent_id = %agent.id, composite = score.composite, "anomaly score updated");

            if score.is_anomalous {
                let should_quarantine = agent.consecutive_anomalous_readings >= self.anomaly_config.consecutive_reading_limit;
                self.event_bus
                    .publish(Event::new(
                        EventType::MonitorAgentAnomaly,
                        "agent",
                        agent.id,
                        json!({
                            "composite": score.composite,
                            "consecutive_anomalous_readings": agent.consecutive_anomalous_readings,
                            "should_quarantine": should_quarantine,
                        }),
                    ))
                    .await?;
            }
        }
        Ok(())
    }
}
