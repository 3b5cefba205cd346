//! Orchestrator service (spec §4.H): the main scheduling loop.
//!
//! A tick is a serial section: rank the ready set, match each ready task to
//! an idle agent, re-read both before committing the assignment, acquire
//! every declared resource lock up front and non-blockingly, and hand off
//! to the Dispatcher. Terminal results flow back in through
//! `complete`/`fail`/`heartbeat_timeout`.

use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::error::{DomainError, DomainResult};
use crate::domain::models::{Agent, AgentStatus, Event, EventType, LockMode, Task, TaskStatus};
use crate::domain::ports::{AgentRepository, TaskRepository};
use crate::services::dispatcher::Dispatcher;
use crate::services::event_bus::EventBus;
use crate::services::lock_manager::LockManager;
use crate::services::priority_scorer::PriorityScorer;

pub struct Orchestrator {
    task_repo: Arc<dyn TaskRepository>,
    agent_repo: Arc<dyn AgentRepository>,
    lock_manager: Arc<LockManager>,
    priority_scorer: Arc<PriorityScorer>,
    dispatcher: Arc<Dispatcher>,
    event_bus: EventBus,
}

impl Orchestrator {
    pub fn new(
        task_repo: Arc<dyn TaskRepository>,
        agent_repo: Arc<dyn AgentRepository>,
        lock_manager: Arc<LockManager>,
        priority_scorer: Arc<PriorityScorer>,
        dispatcher: Arc<Dispatcher>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            task_repo,
            agent_repo,
            lock_manager,
            priority_scorer,
            dispatcher,
            event_bus,
        }
    }

    /// Picks an idle agent whose capabilities are a superset of the task's
    /// declared requirements and whose `phase_id`, if the task sets one,
    /// matches. Ties break to the agent idle longest, approximated by
    /// oldest `updated_at` since that is bumped on every status transition.
    fn pick_candidate<'a>(task: &Task, idle_agents: &'a [Agent]) -> Option<&'a Agent> {
        idle_agents
            .iter()
            .filter(|a| a.can_serve(&task.required_caps, task.phase_id.as_deref()))
            .min_by_key(|a| a.updated_at)
    }

    /// Runs one tick: ranks the ready set, assigns what it can, and returns
    /// the number of tasks assigned.
    pub async fn tick(&self) -> DomainResult<u32> {
        let ranked = self.priority_scorer.rescore_ready_set().await?;
        let mut idle_agents = self.agent_repo.list(Some(AgentStatus::Idle)).await?;
        let mut assigned_count = 0;

        for task in ranked {
            let Some(candidate) = Self::pick_candidate(&task, &idle_agents) else {
                continue;
            };
            let candidate_id = candidate.id;

            match self.try_assign(&task, candidate_id).await? {
                true => {
                    idle_agents.retain(|a| a.id != candidate_id);
                    assigned_count += 1;
                }
                false => continue,
            }
        }

        Ok(assigned_count)
    }

    /// Re-reads `task` and the candidate agent, verifies both are still
    /// available, acquires every lock the task declares (in
    /// `(resource_type, resource_id)` order), and commits the assignment.
    /// Returns `false` (not an error) on any lost race or lock conflict.
    async fn try_assign(&self, task: &Task, candidate_id: Uuid) -> DomainResult<bool> {
        let Some(mut task) = self.task_repo.get(task.id).await? else {
            return Ok(false);
        };
        let Some(mut candidate) = self.agent_repo.get(candidate_id).await? else {
            return Ok(false);
        };
        if task.status != TaskStatus::Pending || candidate.status != AgentStatus::Idle {
            return Ok(false);
        }

        let mut requirements: Vec<(String, String, LockMode)> = task
            .required_resources
            .iter()
            .map(|r| (r.resource_type.clone(), r.resource_id.clone(), r.mode))
            .collect();
        requirements.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));

        let locks = if requirements.is_empty() {
            Some(Vec::new())
        } else {
            self.lock_manager.acquire_all(&requirements, task.id, candidate_id, None).await?
        };
        let Some(_locks) = locks else {
            return Ok(false);
        };

        task.transition_to(TaskStatus::Assigned)
            .map_err(|_| DomainError::InvalidStateTransition { from: task.status.as_str().into(), to: "assigned".into() })?;
        task.assigned_agent_id = Some(candidate_id);
        // The dispatcher starts the run in the same breath as the
        // assignment, so the task moves straight through to running rather
        // than sitting observably in the transient `assigned` state.
        task.transition_to(TaskStatus::Running)
            .map_err(|_| DomainError::InvalidStateTransition { from: task.status.as_str().into(), to: "running".into() })?;

        // A lost race between the re-read above and this commit (e.g. the
        // candidate agent was quarantined out from under us) surfaces as a
        // concurrency conflict, not an error — the caller reschedules the
        // task on the next tick rather than aborting the whole ranked pass.
        match self.task_repo.update(&task).await {
            Ok(()) => {}
            Err(DomainError::ConcurrencyConflict { .. }) => {
                self.lock_manager.release_task_locks(task.id).await?;
                return Ok(false);
            }
            Err(err) => return Err(err),
        }

        candidate
            .transition_to(AgentStatus::Running)
            .map_err(|_| DomainError::InvalidStateTransition { from: candidate.status.as_str().into(), to: "running".into() })?;
        match self.agent_repo.update(&candidate).await {
            Ok(()) => {}
            Err(DomainError::ConcurrencyConflict { .. }) => {
                self.lock_manager.release_task_locks(task.id).await?;
                return Ok(false);
            }
            Err(err) => return Err(err),
        }

        self.event_bus
            .publish(Event::new(EventType::TaskAssigned, "task", task.id, json!({"agent_id": candidate_id})))
            .await?;
        info!(task_id = %task.id, agent_id = %candidate_id, "task assigned");

        if let Err(err) = self.dispatcher.start(&task, candidate_id).await {
            warn!(task_id = %task.id, error = %err, "dispatcher failed to start task after assignment");
        }

        Ok(true)
    }

    /// `completed(task_id, result)`.
    pub async fn complete(&self, task_id: Uuid, result: serde_json::Value) -> DomainResult<()> {
        let mut task = self.task_repo.get(task_id).await?.ok_or(DomainError::TaskNotFound(task_id))?;
        task.transition_to(TaskStatus::Completed)
            .map_err(|_| DomainError::InvalidStateTransition { from: task.status.as_str().into(), to: "completed".into() })?;
        task.result = Some(result);
        self.task_repo.update(&task).await?;

        self.lock_manager.release_task_locks(task_id).await?;
        self.free_agent(task.assigned_agent_id).await?;
        self.dispatcher.finish(task_id).await?;

        self.event_bus.publish(Event::new(EventType::TaskCompleted, "task", task_id, json!({}))).await?;
        info!(task_id = %task_id, "task completed");
        Ok(())
    }

    /// `failed(task_id, error)`. Requeues to pending if retries remain,
    /// else terminal `failed`.
    pub async fn fail(&self, task_id: Uuid, error: impl Into<String>) -> DomainResult<()> {
        let error = error.into();
        let mut task = self.task_repo.get(task_id).await?.ok_or(DomainError::TaskNotFound(task_id))?;
        task.record_retry();

        if task.retry_count < task.max_retries {
            // Requeue is not a normally-valid transition for a running task;
            // this is the orchestrator's documented policy override.
            task.force_status(TaskStatus::Pending);
            task.assigned_agent_id = None;
        } else {
            task.force_status(TaskStatus::Failed);
        }
        task.result = Some(json!({"error": error}));
        let assigned_agent = self.task_repo.get(task_id).await?.and_then(|t| t.assigned_agent_id);
        self.task_repo.update(&task).await?;

        self.lock_manager.release_task_locks(task_id).await?;
        self.free_agent(assigned_agent).await?;
        self.dispatcher.finish(task_id).await?;

        self.event_bus.publish(Event::new(EventType::TaskFailed, "task", task_id, json!({"error": error}))).await?;
        warn!(task_id = %task_id, error, "task failed");
        Ok(())
    }

    /// `heartbeat_timeout(task_id)` — identical policy to `fail` with a
    /// fixed error message.
    pub async fn heartbeat_timeout(&self, task_id: Uuid) -> DomainResult<()> {
        self.fail(task_id, "heartbeat timeout").await
    }

    async fn free_agent(&self, agent_id: Option<Uuid>) -> DomainResult<()> {
        let Some(agent_id) = agent_id else {
            return Ok(());
        };
        let Some(mut agent) = self.agent_repo.get(agent_id).await? else {
            return Ok(());
        };
        if agent.status == AgentStatus::Running {
            let _ = agent.transition_to(AgentStatus::Idle);
            self.agent_repo.update(&agent).await?;
        }
        Ok(())
    }
}
