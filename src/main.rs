//! OmoiOS orchestration core entry point.
//!
//! Boots the long-running service described in spec.md §2: loads config,
//! opens the Store, wires the eleven services over their SQLite/HTTP
//! adapters, and spawns the periodic loops (Orchestrator tick, Monitor tick,
//! Guardian sweep, lock/timeout sweepers) that drive the system forward.
//! No HTTP or CLI surface beyond the flags below (SPEC_FULL.md §A) — the
//! service is driven entirely by the Store and the `AgentRuntime` callbacks.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{info, warn};

use omoios_core::adapters::runtime::{HttpAgentRuntime, HttpSandboxExecutor};
use omoios_core::adapters::sqlite::{
    initialize_database, SqliteAgentRepository, SqliteAnomalyScoreRepository, SqliteBaselineRepository,
    SqliteCollaborationRepository, SqliteEventRepository, SqliteLockRepository, SqliteTaskRepository,
};
use omoios_core::services::{
    AnomalyScorer, BaselineLearner, CollaborationBus, Dispatcher, EventBus, Guardian, LockManager, Monitor,
    Orchestrator, PriorityScorer,
};
use omoios_core::ConfigLoader;

/// Cadence for loops that have no dedicated config knob. The Orchestrator
/// tick and Dispatcher timeout sweep run tight since they gate task
/// latency directly; the lock and guardian sweeps are cooldown-driven and
/// can afford to run looser.
const ORCHESTRATOR_TICK_INTERVAL: Duration = Duration::from_secs(2);
const DISPATCHER_SWEEP_INTERVAL: Duration = Duration::from_secs(5);
const LOCK_SWEEP_INTERVAL: Duration = Duration::from_secs(15);
const GUARDIAN_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "omoios-core", about = "OmoiOS task orchestration core")]
struct Cli {
    /// Path to an `omoios.yaml` config file. Falls back to the default
    /// hierarchical lookup (working-directory `omoios.yaml` + `OMOIOS_`
    /// env vars) when omitted.
    #[arg(long)]
    config: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path).context("failed to load configuration file")?,
        None => ConfigLoader::load().context("failed to load configuration")?,
    };

    let _logger_guard = omoios_core::infrastructure::logging::init(&config.logging.level)
        .context("failed to initialize logging")?;

    info!(database_path = %config.database.path, "starting omoios-core");

    let pool = initialize_database(&config.database.path, config.database.max_connections)
        .await
        .context("failed to open database / run migrations")?;

    let task_repo = Arc::new(SqliteTaskRepository::new(pool.clone()));
    let agent_repo = Arc::new(SqliteAgentRepository::new(pool.clone()));
    let lock_repo = Arc::new(SqliteLockRepository::new(pool.clone()));
    let baseline_repo = Arc::new(SqliteBaselineRepository::new(pool.clone()));
    let anomaly_repo = Arc::new(SqliteAnomalyScoreRepository::new(pool.clone()));
    let collab_repo = Arc::new(SqliteCollaborationRepository::new(pool.clone()));
    let event_repo = Arc::new(SqliteEventRepository::new(pool.clone()));

    let agent_runtime = Arc::new(HttpAgentRuntime::new(&config.runtime).context("failed to build agent runtime client")?);
    let sandbox_executor =
        Arc::new(HttpSandboxExecutor::new(&config.runtime).context("failed to build sandbox executor client")?);

    let event_bus = EventBus::new(1024, event_repo);

    let lock_manager = Arc::new(LockManager::new(lock_repo.clone()));
    let priority_scorer = Arc::new(PriorityScorer::new(config.scheduler, task_repo.clone()));
    let dispatcher = Arc::new(Dispatcher::new(config.dispatcher, agent_runtime.clone()));
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
        config.monitor,
        config.anomaly,
        task_repo.clone(),
        agent_repo.clone(),
        lock_repo.clone(),
        baseline_repo.clone(),
        anomaly_repo.clone(),
        anomaly_scorer.clone(),
        event_bus.clone(),
    ));

    let guardian = Arc::new(Guardian::new(
        config.guardian,
        agent_repo.clone(),
        task_repo.clone(),
        baseline_learner.clone(),
        dispatcher.clone(),
        event_bus.clone(),
    ));

    let _collaboration_bus = Arc::new(CollaborationBus::new(
        collab_repo,
        task_repo.clone(),
        sandbox_executor,
        agent_runtime,
        event_bus.clone(),
    ));

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let mut handles = Vec::new();
    handles.push(spawn_orchestrator_loop(orchestrator.clone(), shutdown_tx.subscribe()));
    handles.push(spawn_monitor_loop(monitor, Duration::from_secs(config.monitor.tick_interval_secs), shutdown_tx.subscribe()));
    handles.push(spawn_guardian_sweep_loop(guardian.clone(), shutdown_tx.subscribe()));
    handles.push(spawn_guardian_anomaly_subscriber(guardian, event_bus.subscribe(), shutdown_tx.subscribe()));
    handles.push(spawn_lock_sweep_loop(lock_manager, shutdown_tx.subscribe()));
    handles.push(spawn_dispatcher_sweep_loop(dispatcher, orchestrator, shutdown_tx.subscribe()));

    tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
    info!("shutdown signal received, stopping service loops");
    let _ = shutdown_tx.send(());

    for handle in handles {
        let _ = handle.await;
    }

    Ok(())
}

fn spawn_orchestrator_loop(
    orchestrator: Arc<Orchestrator>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(ORCHESTRATOR_TICK_INTERVAL);
        info!(interval_secs = ORCHESTRATOR_TICK_INTERVAL.as_secs(), "orchestrator tick loop started");
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(e) = orchestrator.tick().await {
                        warn!(error = %e, "orchestrator tick failed");
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }
    })
}

fn spawn_monitor_loop(
    monitor: Arc<Monitor>,
    interval_duration: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(interval_duration);
        info!(interval_secs = interval_duration.as_secs(), "monitor tick loop started");
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(e) = monitor.tick().await {
                        warn!(error = %e, "monitor tick failed");
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }
    })
}

/// Forwards `monitor.agent.anomaly` events onto Guardian as they're
/// published, rather than having Guardian poll the Store itself — the
/// `EventBus → Guardian` link spec §2's component diagram names.
fn spawn_guardian_anomaly_subscriber(
    guardian: Arc<Guardian>,
    mut subscription: omoios_core::services::EventSubscription,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        info!("guardian anomaly subscriber started");
        loop {
            tokio::select! {
                event = subscription.recv_matching("monitor.agent.anomaly") => {
                    let Some(event) = event else { break };
                    let should_quarantine = event.payload.get("should_quarantine").and_then(|v| v.as_bool()).unwrap_or(false);
                    if let Err(e) = guardian.handle_anomaly(event.entity_id, should_quarantine).await {
                        warn!(error = %e, agent_id = %event.entity_id, "guardian failed to handle anomaly event");
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }
    })
}

fn spawn_guardian_sweep_loop(guardian: Arc<Guardian>, mut shutdown_rx: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(GUARDIAN_SWEEP_INTERVAL);
        info!(interval_secs = GUARDIAN_SWEEP_INTERVAL.as_secs(), "guardian sweep loop started");
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    match guardian.sweep().await {
                        Ok(n) if n > 0 => info!(transitions = n, "guardian sweep applied resurrection/dead-promotion transitions"),
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "guardian sweep failed"),
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }
    })
}

fn spawn_lock_sweep_loop(lock_manager: Arc<LockManager>, mut shutdown_rx: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(LOCK_SWEEP_INTERVAL);
        info!(interval_secs = LOCK_SWEEP_INTERVAL.as_secs(), "lock expiry sweep loop started");
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    match lock_manager.cleanup_expired().await {
                        Ok(expired) if !expired.is_empty() => {
                            info!(count = expired.len(), "released expired resource locks");
                        }
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "lock expiry sweep failed"),
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }
    })
}

fn spawn_dispatcher_sweep_loop(
    dispatcher: Arc<Dispatcher>,
    orchestrator: Arc<Orchestrator>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(DISPATCHER_SWEEP_INTERVAL);
        info!(interval_secs = DISPATCHER_SWEEP_INTERVAL.as_secs(), "dispatcher timeout sweep loop started");
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    for task_id in dispatcher.sweep_timeouts().await {
                        if let Err(e) = orchestrator.heartbeat_timeout(task_id).await {
                            warn!(error = %e, %task_id, "failed to apply heartbeat timeout");
                        }
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }
    })
}
