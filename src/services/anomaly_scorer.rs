//! CompositeAnomalyScorer service (spec §4.E).
//!
//! A pure function of its inputs except for one piece of state it must
//! own: the per-agent error-rate EMA. The source kept that EMA in a
//! module-level cache; spec §9 calls that out for re-architecture, so it
//! lives on this struct instance instead.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::error::DomainResult;
use crate::domain::models::{AgentBaseline, AnomalyComponents, Priority, Task, TaskStatus};
use crate::domain::ports::TaskRepository;

/// Smoothing factor for the in-memory error-rate EMA.
const ERROR_RATE_EMA_ALPHA: f64 = 0.1;
const QUEUE_IMPACT_NORMALIZER: f64 = 10.0;

pub struct AnomalyScorer {
    task_repo: Arc<dyn TaskRepository>,
    error_rate_ema: Mutex<HashMap<Uuid, f64>>,
}

impl AnomalyScorer {
    pub fn new(task_repo: Arc<dyn TaskRepository>) -> Self {
        Self {
            task_repo,
            error_rate_ema: Mutex::new(HashMap::new()),
        }
    }

    /// `z = (observed - baseline)/baseline_std`, normalized to `[0,1]` as
    /// `min(1, |z|/3)`. Zero if there is no baseline or its std is zero.
    fn latency_component(baseline: Option<&AgentBaseline>, observed_latency_ms: Option<f64>) -> f64 {
        let (Some(baseline), Some(observed)) = (baseline, observed_latency_ms) else {
            return 0.0;
        };
        if baseline.latency_std <= 0.0 {
            return 0.0;
        }
        let z = (observed - baseline.latency_ms) / baseline.latency_std;
        (z.abs() / 3.0).min(1.0)
    }

    /// Updates this agent's in-memory error-rate EMA with `observed`, then
    /// returns the normalized component: relative increase over baseline if
    /// `baseline.error_rate > 0`, else the raw EMA; clipped to `[0,1]`.
    async fn error_rate_component(&self, agent_id: Uuid, baseline: Option<&AgentBaseline>, observed_error_rate: Option<f64>) -> f64 {
        let Some(observed) = observed_error_rate else {
            return 0.0;
        };
        let mut emas = self.error_rate_ema.lock().await;
        let ema = emas
            .entry(agent_id)
            .and_modify(|e| *e = ERROR_RATE_EMA_ALPHA * observed + (1.0 - ERROR_RATE_EMA_ALPHA) * *e)
            .or_insert(observed);
        let ema = *ema;

        let raw = match baseline {
            Some(b) if b.error_rate > 0.0 => ((ema - b.error_rate) / b.error_rate).max(0.0),
            _ => ema,
        };
        raw.clamp(0.0, 1.0)
    }

    /// Average of CPU skew and memory skew, each `min(1, |observed -
    /// baseline|/max(baseline, 1))`. Zero if both observed inputs are
    /// absent.
    fn resource_skew_component(
        baseline: Option<&AgentBaseline>,
        observed_cpu: Option<f64>,
        observed_memory: Option<f64>,
    ) -> f64 {
        if observed_cpu.is_none() && observed_memory.is_none() {
            return 0.0;
        }
        let cpu_base = baseline.map(|b| b.cpu_usage_percent).unwrap_or(0.0);
        let mem_base = baseline.map(|b| b.memory_usage_mb).unwrap_or(0.0);

        let cpu_skew = observed_cpu.map(|o| (o - cpu_base).abs() / cpu_base.max(1.0)).unwrap_or(0.0).min(1.0);
        let mem_skew = observed_memory.map(|o| (o - mem_base).abs() / mem_base.max(1.0)).unwrap_or(0.0).min(1.0);
        (cpu_skew + mem_skew) / 2.0
    }

    /// Counts distinct pending tasks whose `depends_on` intersects this
    /// agent's `{assigned, running}` task set, counting CRITICAL-priority
    /// dependents twice, normalized by `/10` and capped at 1.0. This
    /// resolves the double-counting ambiguity spec §9 flags as an open
    /// question: every pending task is counted at most once regardless of
    /// how many of the agent's tasks it depends on.
    async fn queue_impact_component(&self, agent_id: Uuid) -> DomainResult<f64> {
        let assigned = self.task_repo.list_by_agent(agent_id, Some(TaskStatus::Assigned)).await?;
        let running = self.task_repo.list_by_agent(agent_id, Some(TaskStatus::Running)).await?;
        let agent_task_ids: HashSet<Uuid> = assigned.iter().chain(running.iter()).map(|t| t.id).collect();
        if agent_task_ids.is_empty() {
            return Ok(0.0);
        }

        let pending = self.task_repo.list_by_status(TaskStatus::Pending).await?;
        let mut weighted_count = 0.0;
        for task in &pending {
            if task.depends_on.iter().any(|dep| agent_task_ids.contains(dep)) {
                weighted_count += if task.priority == Priority::Critical { 2.0 } else { 1.0 };
            }
        }
        Ok((weighted_count / QUEUE_IMPACT_NORMALIZER).min(1.0))
    }

    /// Computes the four normalized components for one agent observation.
    /// Missing inputs contribute 0 to their component; this never mutates
    /// state beyond the in-memory error-rate EMA.
    pub async fn score(
        &self,
        agent_id: Uuid,
        baseline: Option<&AgentBaseline>,
        observed_latency_ms: Option<f64>,
        observed_error_rate: Option<f64>,
        observed_cpu_usage_percent: Option<f64>,
        observed_memory_usage_mb: Option<f64>,
    ) -> DomainResult<AnomalyComponents> {
        let latency = Self::latency_component(baseline, observed_latency_ms);
        let error_rate = self.error_rate_component(agent_id, baseline, observed_error_rate).await;
        let resource_skew = Self::resource_skew_component(baseline, observed_cpu_usage_percent, observed_memory_usage_mb);
        let queue_impact = self.queue_impact_component(agent_id).await?;

        Ok(AnomalyComponents {
            latency,
            error_rate,
            resource_skew,
            queue_impact,
        })
    }
}
