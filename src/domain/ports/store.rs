//! Repository contracts for durable persistence (spec §4.A).
//!
//! Every repository is `Send + Sync` and takes `&self`. The multi-row
//! critical sections spec §4.A and §4.H call for (lock acquisition, a
//! tick's task-to-agent assignment) are serialized by an in-process
//! `tokio::sync::Mutex` inside the owning service (`LockManager`,
//! `Orchestrator`) rather than by an explicit `sqlx::Transaction` threaded
//! through these traits — correct under the single-leader orchestrator
//! assumption (spec §1 Non-goals: no distributed consensus across
//! replicas), since there is exactly one process issuing these calls.
//! `Task.version`/`ResourceLock.version` still give every `update` an
//! optimistic-locking check as a second line of defense.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::error::DomainResult;
use crate::domain::models::{
    Agent, AgentBaseline, AgentMessage, AgentStatus, AnomalyScore, BaselineKey,
    CollaborationThread, Event, MonitorAnomaly, ResourceLock, Task, TaskStatus, Ticket,
    TicketStatus,
};

/// Repository interface for ticket persistence.
#[async_trait]
pub trait TicketRepository: Send + Sync {
    async fn insert(&self, ticket: &Ticket) -> DomainResult<()>;
    async fn get(&self, id: Uuid) -> DomainResult<Option<Ticket>>;
    async fn update(&self, ticket: &Ticket) -> DomainResult<()>;
    async fn list(&self, status: Option<TicketStatus>) -> DomainResult<Vec<Ticket>>;
}

/// Repository interface for task persistence, including the normalized
/// `task_dependencies` edge table. `blocks` (the inverse of `depends_on`) is
/// never stored; it is derived by `dependents_of` doing an index lookup.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn insert(&self, task: &Task, depends_on: &[Uuid]) -> DomainResult<()>;
    async fn get(&self, id: Uuid) -> DomainResult<Option<Task>>;

    /// Optimistic-locking update: succeeds only if `task.version` still
    /// matches the stored row, otherwise returns
    /// `DomainError::ConcurrencyConflict`.
    async fn update(&self, task: &Task) -> DomainResult<()>;

    async fn depends_on(&self, task_id: Uuid) -> DomainResult<Vec<Uuid>>;

    /// Derives the inverse of `depends_on`: every task that names `task_id`
    /// as a dependency.
    async fn dependents_of(&self, task_id: Uuid) -> DomainResult<Vec<Uuid>>;

    /// Tasks in `pending` status whose every dependency is `completed`,
    /// ordered by `priority_score` desc then `created_at` asc.
    async fn ready_set(&self) -> DomainResult<Vec<Task>>;

    async fn list_by_status(&self, status: TaskStatus) -> DomainResult<Vec<Task>>;
    async fn list_by_agent(&self, agent_id: Uuid, status: Option<TaskStatus>) -> DomainResult<Vec<Task>>;
    async fn list_by_ticket(&self, ticket_id: Uuid) -> DomainResult<Vec<Task>>;
}

/// Repository interface for agent persistence.
#[async_trait]
pub trait AgentRepository: Send + Sync {
    async fn insert(&self, agent: &Agent) -> DomainResult<()>;
    async fn get(&self, id: Uuid) -> DomainResult<Option<Agent>>;
    async fn update(&self, agent: &Agent) -> DomainResult<()>;
    async fn list(&self, status: Option<AgentStatus>) -> DomainResult<Vec<Agent>>;
    async fn find_idle_matching(&self, required_caps: &[String], phase_id: Option<&str>) -> DomainResult<Vec<Agent>>;
    async fn find_stale(&self, heartbeat_threshold_secs: i64) -> DomainResult<Vec<Agent>>;
}

/// Repository interface for resource lock persistence.
#[async_trait]
pub trait LockRepository: Send + Sync {
    async fn insert(&self, lock: &ResourceLock) -> DomainResult<()>;
    async fn get(&self, id: Uuid) -> DomainResult<Option<ResourceLock>>;

    /// Optimistic-locking update (e.g. `release`, `renew`).
    async fn update(&self, lock: &ResourceLock) -> DomainResult<()>;

    async fn active_for_resource(&self, resource_type: &str, resource_id: &str) -> DomainResult<Vec<ResourceLock>>;
    async fn active_for_task(&self, task_id: Uuid) -> DomainResult<Vec<ResourceLock>>;
    async fn list_active(&self) -> DomainResult<Vec<ResourceLock>>;
    async fn list_expired(&self, now: DateTime<Utc>) -> DomainResult<Vec<ResourceLock>>;
}

/// Repository interface for baseline persistence, keyed by
/// `(agent_type, phase_id)`.
#[async_trait]
pub trait BaselineRepository: Send + Sync {
    async fn get(&self, key: &BaselineKey) -> DomainResult<Option<AgentBaseline>>;
    async fn upsert(&self, baseline: &AgentBaseline) -> DomainResult<()>;
    async fn list(&self) -> DomainResult<Vec<AgentBaseline>>;
}

/// Repository interface for the append-only composite anomaly score and
/// rolling-window [`MonitorAnomaly`] tables.
#[async_trait]
pub trait AnomalyScoreRepository: Send + Sync {
    async fn insert_score(&self, score: &AnomalyScore) -> DomainResult<()>;
    async fn latest_for_agent(&self, agent_id: Uuid) -> DomainResult<Option<AnomalyScore>>;

    async fn insert_monitor_anomaly(&self, anomaly: &MonitorAnomaly) -> DomainResult<()>;
    async fn list_monitor_anomalies(&self, metric_name: Option<&str>) -> DomainResult<Vec<MonitorAnomaly>>;
}

/// Repository interface for collaboration threads and messages.
#[async_trait]
pub trait CollaborationRepository: Send + Sync {
    async fn insert_thread(&self, thread: &CollaborationThread) -> DomainResult<()>;
    async fn get_thread(&self, id: Uuid) -> DomainResult<Option<CollaborationThread>>;
    async fn update_thread(&self, thread: &CollaborationThread) -> DomainResult<()>;
    async fn find_thread_for_participants(
        &self,
        participants: &[Uuid],
    ) -> DomainResult<Option<CollaborationThread>>;

    async fn insert_message(&self, message: &AgentMessage) -> DomainResult<()>;
    async fn update_message(&self, message: &AgentMessage) -> DomainResult<()>;
    async fn list_messages(&self, thread_id: Uuid) -> DomainResult<Vec<AgentMessage>>;
}

/// Repository interface for the append-only `Event` audit table.
#[async_trait]
pub trait EventRepository: Send + Sync {
    async fn insert(&self, event: &Event) -> DomainResult<()>;
    async fn list_for_entity(&self, entity_id: Uuid) -> DomainResult<Vec<Event>>;
    async fn list_recent(&self, limit: u32) -> DomainResult<Vec<Event>>;
}
