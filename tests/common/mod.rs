//! Shared harness for the seed-scenario integration tests: wires the full
//! in-process stack (SQLite-backed Store, mock `AgentRuntime`/
//! `SandboxExecutor`) the way `main.rs` wires the production binary, minus
//! the periodic loops — tests drive ticks/sweeps explicitly.

use std::sync::Arc;

use omoios_core::adapters::runtime::{MockAgentRuntime, MockSandboxExecutor};
use omoios_core::adapters::sqlite::{
    create_migrated_test_pool, SqliteAgentRepository, SqliteAnomalyScoreRepository, SqliteBaselineRepository,
    SqliteCollaborationRepository, SqliteEventRepository, SqliteLockRepository, SqliteTaskRepository,
    SqliteTicketRepository,
};
use omoios_core::domain::models::Ticket;
use omoios_core::domain::ports::TicketRepository;
use omoios_core::infrastructure::config::{AnomalyConfig, DispatcherConfig, GuardianConfig, MonitorConfig, SchedulerConfig};
use omoios_core::services::{
    AnomalyScorer, BaselineLearner, CollaborationBus, Dispatcher, EventBus, Guardian, LockManager, Monitor,
    Orchestrator, PriorityScorer,
};

#[allow(dead_code)]
pub struct Stack {
    pub task_repo: Arc<SqliteTaskRepository>,
    pub agent_repo: Arc<SqliteAgentRepository>,
    pub lock_repo: Arc<SqliteLockRepository>,
    pub event_repo: Arc<SqliteEventRepository>,
    pub ticket_repo: Arc<SqliteTicketRepository>,
    pub event_bus: EventBus,
    pub lock_manager: Arc<LockManager>,
    pub priority_scorer: Arc<PriorityScorer>,
    pub dispatcher: Arc<Dispatcher>,
    pub orchestrator: Arc<Orchestrator>,
    pub anomaly_scorer: Arc<AnomalyScorer>,
    pub baseline_learner: Arc<BaselineLearner>,
    pub monitor: Arc<Monitor>,
    pub guardian: Arc<Guardian>,
    pub collaboration_bus: Arc<CollaborationBus>,
    pub collab_repo: Arc<SqliteCollaborationRepository>,
    pub runtime: Arc<MockAgentRuntime>,
}

#[allow(dead_code)]
pub async fn build_stack() -> Stack {
    let pool = create_migrated_test_pool().await.expect("migrated test pool");

    let task_repo = Arc::new(SqliteTaskRepository::new(pool.clone()));
    let agent_repo = Arc::new(SqliteAgentRepository::new(pool.clone()));
    let lock_repo = Arc::new(SqliteLockRepository::new(pool.clone()));
    let baseline_repo = Arc::new(SqliteBaselineRepository::new(pool.clone()));
    let anomaly_repo = Arc::new(SqliteAnomalyScoreRepository::new(pool.clone()));
    let collab_repo = Arc::new(SqliteCollaborationRepository::new(pool.clone()));
    let event_repo = Arc::new(SqliteEventRepository::new(pool.clone()));
    let ticket_repo = Arc::new(SqliteTicketRepository::new(pool.clone()));

    let agent_runtime = Arc::new(MockAgentRuntime::new());
    let sandbox_executor = Arc::new(MockSandboxExecutor);

    let event_bus = EventBus::new(256, event_repo.clone());

    let lock_manager = Arc::new(LockManager::new(lock_repo.clone()));
    let priority_scorer = Arc::new(PriorityScorer::new(SchedulerConfig::default(), task_repo.clone()));
    let dispatcher = Arc::new(Dispatcher::new(DispatcherConfig::default(), agent_runtime.clone()));
    let anomaly_scorer = Arc::new(AnomalyScorer::new(task_repo.clone()));
    let baseline_learner = Arc::new(BaselineLearner::new(baseline_repo.clone()));

    let orchestrator = Arc::new(Orchestrator::new(
        task_repo.clone(),
        agent_repo.clone(),
        lock_manager.clone(),
        priority_scorer.clone(),
        dispatcher.clone(),
        event_bus.clone(),
    ));

    let monitor = Arc::new(Monitor::new(
        MonitorConfig::default(),
        AnomalyConfig::default(),
        task_repo.clone(),
        agent_repo.clone(),
        lock_repo.clone(),
        baseline_repo.clone(),
        anomaly_repo.clone(),
        anomaly_scorer.clone(),
        event_bus.clone(),
    ));

    let guardian = Arc::new(Guardian::new(
        GuardianConfig::default(),
        agent_repo.clone(),
        task_repo.clone(),
        baseline_learner.clone(),
        dispatcher.clone(),
        event_bus.clone(),
    ));

    let collaboration_bus = Arc::new(CollaborationBus::new(
        collab_repo.clone(),
        task_repo.clone(),
        sandbox_executor,
        agent_runtime.clone(),
        event_bus.clone(),
    ));

    Stack {
        task_repo,
        agent_repo,
        lock_repo,
        event_repo,
        ticket_repo,
        event_bus,
        lock_manager,
        priority_scorer,
        dispatcher,
        orchestrator,
        anomaly_scorer,
        baseline_learner,
        monitor,
        guardian,
        collaboration_bus,
        collab_repo,
        runtime: agent_runtime,
    }
}

/// Inserts a minimal ticket and returns its id, satisfying the
/// `tasks.ticket_id` foreign key every seeded task needs.
#[allow(dead_code)]
pub async fn seed_ticket(stack: &Stack, title: &str) -> uuid::Uuid {
    let ticket = Ticket::new(title, "seed fixture");
    let id = ticket.id;
    stack.ticket_repo.insert(&ticket).await.expect("insert ticket");
    id
}

