//! Guardian service (spec §4.J).
//!
//! Subscribes to `monitor.agent.anomaly` events and enforces quarantine,
//! resurrection, and dead-promotion policy. Runs as its own periodic task
//! that also performs time-based resurrection/dead-promotion sweeps, since
//! a cooldown firing is not itself an event.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::error::{DomainError, DomainResult};
use crate::domain::models::{Agent, AgentStatus, Event, EventType};
use crate::domain::ports::{AgentRepository, TaskRepository};
use crate::infrastructure::config::GuardianConfig;
use crate::services::baseline_learner::BaselineLearner;
use crate::services::dispatcher::Dispatcher;
use crate::services::event_bus::EventBus;

pub struct Guardian {
    config: GuardianConfig,
    agent_repo: Arc<dyn AgentRepository>,
    task_repo: Arc<dyn TaskRepository>,
    baseline_learner: Arc<BaselineLearner>,
    dispatcher: Arc<Dispatcher>,
    event_bus: EventBus,
    /// When each currently-quarantined agent entered quarantine, so
    /// `sweep()` can tell cooldown-eligible agents apart from recent ones.
    quarantined_since: Mutex<HashMap<Uuid, DateTime<Utc>>>,
    /// Quarantine timestamps within the dead-promotion window, so repeated
    /// quarantine can be detected without re-reading history from the Store.
    quarantine_history: Mutex<HashMap<Uuid, Vec<DateTime<Utc>>>>,
}

impl Guardian {
    pub fn new(
        config: GuardianConfig,
        agent_repo: Arc<dyn AgentRepository>,
        task_repo: Arc<dyn TaskRepository>,
        baseline_learner: Arc<BaselineLearner>,
        dispatcher: Arc<Dispatcher>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            config,
            agent_repo,
            task_repo,
            baseline_learner,
            dispatcher,
            event_bus,
            quarantined_since: Mutex::new(HashMap::new()),
            quarantine_history: Mutex::new(HashMap::new()),
        }
    }

    /// Handles one `monitor.agent.anomaly` reading. If `should_quarantine`
    /// is set, transitions the agent to quarantined, fails its running task
    /// if any, and records the quarantine timestamp for the dead-promotion
    /// check.
    pub async fn handle_anomaly(&self, agent_id: Uuid, should_quarantine: bool) -> DomainResult<()> {
        if !should_quarantine {
            return Ok(());
        }
        let mut agent = self.agent_repo.get(agent_id).await?.ok_or(DomainError::AgentNotFound(agent_id))?;
        if !matches!(agent.status, AgentStatus::Idle | AgentStatus::Running | AgentStatus::Degraded) {
            return Ok(());
        }

        if agent.status == AgentStatus::Running {
            let running = self.task_repo.list_by_agent(agent_id, Some(crate::domain::models::TaskStatus::Running)).await?;
            for mut task in running {
                task.force_status(crate::domain::models::TaskStatus::Failed);
                task.record_retry();
                task.result = Some(json!({"error": "agent quarantined"}));
                self.task_repo.update(&task).await?;
                self.dispatcher.finish(task.id).await?;
                self.event_bus
                    .publish(Event::new(EventType::TaskFailed, "task", task.id, json!({"error": "agent quarantined"})))
                    .await?;
            }
        }

        agent.force_status(AgentStatus::Quarantined);
        self.agent_repo.update(&agent).await?;

        let now = Utc::now();
        self.quarantined_since.lock().await.insert(agent_id, now);
        let mut history = self.quarantine_history.lock().await;
        let window_start = now - chrono::Duration::seconds(self.config.dead_promotion_window_secs);
        let entry = history.entry(agent_id).or_default();
        entry.retain(|t| *t >= window_start);
        entry.push(now);
        let quarantine_count = entry.len() as u32;
        drop(history);

        self.event_bus
            .publish(Event::new(EventType::AgentQuarantined, "agent", agent_id, json!({"agent_type": agent.agent_type})))
            .await?;
        warn!(agent_id = %agent_id, "agent quarantined");

        if quarantine_count >= self.config.dead_promotion_count {
            self.promote_to_dead(agent_id).await?;
        }

        Ok(())
    }

    async fn promote_to_dead(&self, agent_id: Uuid) -> DomainResult<()> {
        let mut agent = self.agent_repo.get(agent_id).await?.ok_or(DomainError::AgentNotFound(agent_id))?;
        if agent.status == AgentStatus::Dead {
            return Ok(());
        }
        agent.force_status(AgentStatus::Dead);
        self.agent_repo.update(&agent).await?;
        self.quarantined_since.lock().await.remove(&agent_id);
        self.quarantine_history.lock().await.remove(&agent_id);

        self.event_bus.publish(Event::new(EventType::AgentDead, "agent", agent_id, json!({}))).await?;
        info!(agent_id = %agent_id, "agent repeatedly quarantined; promoted to dead");
        Ok(())
    }

    /// Periodic sweep: resurrects any quarantined agent whose cooldown has
    /// elapsed. Runs on its own cadence alongside the Monitor tick.
    pub async fn sweep(&self) -> DomainResult<u32> {
        let now = Utc::now();
        let due: Vec<Uuid> = self
            .quarantined_since
            .lock()
            .await
            .iter()
            .filter(|(_, since)| (now - **since).num_seconds() >= self.config.resurrection_cooldown_secs)
            .map(|(id, _)| *id)
            .collect();

        let mut resurrected = 0;
        for agent_id in due {
            if self.resurrect(agent_id).await?.is_some() {
                resurrected += 1;
            }
        }
        Ok(resurrected)
    }

    async fn resurrect(&self, agent_id: Uuid) -> DomainResult<Option<()>> {
        let Some(mut agent) = self.agent_repo.get(agent_id).await? else {
            self.quarantined_since.lock().await.remove(&agent_id);
            return Ok(None);
        };
        if agent.status != AgentStatus::Quarantined {
            self.quarantined_since.lock().await.remove(&agent_id);
            return Ok(None);
        }

        self.baseline_learner.decay(&agent.agent_type, agent.phase_id.clone()).await?;
        agent.consecutive_anomalous_readings = 0;
        agent.force_status(AgentStatus::Idle);
        self.agent_repo.update(&agent).await?;
        self.quarantined_since.lock().await.remove(&agent_id);

        self.event_bus.publish(Event::new(EventType::AgentResurrected, "agent", agent_id, json!({}))).await?;
        info!(agent_id = %agent_id, "agent resurrected after cooldown");
        Ok(Some(()))
    }
}
