//! Agent domain model.
//!
//! An agent is a long-lived worker the Orchestrator assigns tasks to. Health
//! signals observed by the Monitor feed the BaselineLearner and
//! CompositeAnomalyScorer, which in turn inform the Guardian's quarantine
//! decisions. `dead` is terminal for a given incarnation; a replacement
//! agent is the responsibility of an external provisioning layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Running,
    Degraded,
    Quarantined,
    Dead,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Degraded => "degraded",
            Self::Quarantined => "quarantined",
            Self::Dead => "dead",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(Self::Idle),
            "running" => Some(Self::Running),
            "degraded" => Some(Self::Degraded),
            "quarantined" => Some(Self::Quarantined),
            "dead" => Some(Self::Dead),
            _ => None,
        }
    }

    pub fn valid_transitions(&self) -> &'static [AgentStatus] {
        match self {
            Self::Idle => &[Self::Running, Self::Degraded, Self::Quarantined],
            Self::Running => &[Self::Idle, Self::Degraded, Self::Quarantined],
            Self::Degraded => &[Self::Idle, Self::Running, Self::Quarantined],
            Self::Quarantined => &[Self::Idle, Self::Dead],
            Self::Dead => &[],
        }
    }

    pub fn can_transition_to(&self, target: AgentStatus) -> bool {
        self.valid_transitions().contains(&target)
    }

    pub fn is_assignable(&self) -> bool {
        matches!(self, Self::Idle)
    }
}

impl Default for AgentStatus {
    fn default() -> Self {
        Self::Idle
    }
}

/// Point-in-time health reading reported by or observed about an agent.
/// Mirrors the heartbeat payload accepted by the inbound `Heartbeat`
/// operation: four named fields plus an open-ended extras bag, matching
/// `health_metrics` in the source this was distilled from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthMetrics {
    pub latency_ms: f64,
    pub latency_std: f64,
    pub error_rate: f64,
    pub cpu_usage_percent: f64,
    pub memory_usage_mb: f64,
    #[serde(default)]
    pub additional_metrics: std::collections::HashMap<String, f64>,
}

impl HealthMetrics {
    pub fn new(
        latency_ms: f64,
        latency_std: f64,
        error_rate: f64,
        cpu_usage_percent: f64,
        memory_usage_mb: f64,
    ) -> Self {
        Self {
            latency_ms,
            latency_std,
            error_rate,
            cpu_usage_percent,
            memory_usage_mb,
            additional_metrics: std::collections::HashMap::new(),
        }
    }
}

/// A long-lived worker capable of executing tasks inside a sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: Uuid,
    pub agent_type: String,
    pub phase_id: Option<String>,
    pub status: AgentStatus,
    pub capabilities: Vec<String>,

    /// Long-lived conversation the agent maintains across tasks. Distinct
    /// from a task's own `conversation_id`, which overrides delivery
    /// targeting for the duration of a single task.
    pub conversation_id: Option<String>,
    pub workspace_dir: Option<String>,

    pub last_heartbeat: Option<DateTime<Utc>>,
    pub anomaly_score: f64,
    pub consecutive_anomalous_readings: u32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl Agent {
    pub fn new(agent_type: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            agent_type: agent_type.into(),
            phase_id: None,
            status: AgentStatus::default(),
            capabilities: Vec::new(),
            conversation_id: None,
            workspace_dir: None,
            last_heartbeat: None,
            anomaly_score: 0.0,
            consecutive_anomalous_readings: 0,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    pub fn with_phase(mut self, phase_id: impl Into<String>) -> Self {
        self.phase_id = Some(phase_id.into());
        self
    }

    pub fn with_capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn has_capability(&self, cap: &str) -> bool {
        self.capabilities.iter().any(|c| c == cap)
    }

    /// A task's declared capability set must be a subset of the agent's.
    pub fn satisfies_required_caps(&self, required: &[String]) -> bool {
        required.iter().all(|c| self.has_capability(c))
    }

    /// Capability and, if the task declares one, phase match.
    pub fn can_serve(&self, required_caps: &[String], task_phase_id: Option<&str>) -> bool {
        self.satisfies_required_caps(required_caps)
            && task_phase_id.is_none_or(|p| self.phase_id.as_deref() == Some(p))
    }

    pub fn transition_to(&mut self, target: AgentStatus) -> Result<(), String> {
        if !self.status.can_transition_to(target) {
            return Err(format!(
                "invalid agent transition from {} to {}",
                self.status.as_str(),
                target.as_str()
            ));
        }
        self.apply_transition(target);
        Ok(())
    }

    pub fn force_status(&mut self, target: AgentStatus) {
        tracing::warn!(
            agent_id = %self.id,
            from = self.status.as_str(),
            to = target.as_str(),
            "forcing agent status outside normal transition rules"
        );
        self.apply_transition(target);
    }

    fn apply_transition(&mut self, target: AgentStatus) {
        self.status = target;
        self.updated_at = Utc::now();
        self.version += 1;
    }

    pub fn record_anomaly_reading(&mut self, score: f64, threshold: f64) {
        self.anomaly_score = score;
        if score >= threshold {
            self.consecutive_anomalous_readings += 1;
        } else {
            self.consecutive_anomalous_readings = 0;
        }
        self.updated_at = Utc::now();
        self.version += 1;
    }

    pub fn record_heartbeat(&mut self) {
        self.last_heartbeat = Some(Utc::now());
    }

    pub fn is_heartbeat_stale(&self, now: DateTime<Utc>, timeout_secs: i64) -> bool {
        match self.last_heartbeat {
            Some(hb) => (now - hb).num_seconds() > timeout_secs,
            None => true,
        }
    }
}
