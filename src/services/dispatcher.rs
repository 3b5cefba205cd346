//! Dispatcher service (spec §4.K).
//!
//! One logical dispatcher instance owns the lifecycle of every live
//! (task, agent) pairing: starting the run via `AgentRuntime`, tracking its
//! per-task deadline, and forwarding terminal results (including
//! heartbeat-timeout) back to the Orchestrator.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::error::{DomainError, DomainResult};
use crate::domain::models::Task;
use crate::domain::ports::{AgentRuntime, ConversationHandle};
use crate::infrastructure::config::DispatcherConfig;

struct RunningPairing {
    agent_id: Uuid,
    handle: ConversationHandle,
    deadline: DateTime<Utc>,
}

pub struct Dispatcher {
    config: DispatcherConfig,
    runtime: Arc<dyn AgentRuntime>,
    pairings: Mutex<HashMap<Uuid, RunningPairing>>,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig, runtime: Arc<dyn AgentRuntime>) -> Self {
        Self {
            config,
            runtime,
            pairings: Mutex::new(HashMap::new()),
        }
    }

    /// Starts the agent on this task and records the pairing's deadline:
    /// the later of the task's own `deadline` and the configured default
    /// per-task timeout.
    pub async fn start(&self, task: &Task, agent_id: Uuid) -> DomainResult<ConversationHandle> {
        let handle = self
            .runtime
            .start(task, agent_id)
            .await
            .map_err(|e| DomainError::ValidationFailed(e.to_string()))?;

        let default_deadline = Utc::now() + chrono::Duration::seconds(self.config.default_task_timeout_secs as i64);
        let deadline = task.deadline.map(|d| d.max(default_deadline)).unwrap_or(default_deadline);

        self.pairings.lock().await.insert(
            task.id,
            RunningPairing {
                agent_id,
                handle: handle.clone(),
                deadline,
            },
        );
        info!(task_id = %task.id, agent_id = %agent_id, "dispatcher started task");
        Ok(handle)
    }

    /// Forwards a free-text intervention to a live pairing. Used by
    /// CollaborationBus and Guardian. No-op if the pairing is gone.
    pub async fn inject_message(&self, task_id: Uuid, text: &str) -> DomainResult<bool> {
        let handle = {
            let pairings = self.pairings.lock().await;
            match pairings.get(&task_id) {
                Some(p) => p.handle.clone(),
                None => return Ok(false),
            }
        };
        self.runtime
            .inject_message(&handle, text)
            .await
            .map_err(|e| DomainError::ValidationFailed(e.to_string()))
    }

    /// Removes the pairing on a terminal transition, whichever side
    /// triggered it (completion, failure, or cancellation).
    pub async fn finish(&self, task_id: Uuid) -> DomainResult<()> {
        let handle = self.pairings.lock().await.remove(&task_id).map(|p| p.handle);
        if let Some(handle) = handle {
            let _ = self.runtime.cancel(&handle).await;
        }
        Ok(())
    }

    /// Returns every task id whose pairing has passed its deadline. The
    /// Orchestrator is responsible for calling its own `heartbeat_timeout`
    /// handler for each, which in turn calls `finish`.
    pub async fn sweep_timeouts(&self) -> Vec<Uuid> {
        let now = Utc::now();
        let pairings = self.pairings.lock().await;
        let expired: Vec<Uuid> = pairings
            .iter()
            .filter(|(_, p)| p.deadline < now)
            .map(|(task_id, _)| *task_id)
            .collect();
        for task_id in &expired {
            warn!(task_id = %task_id, "task pairing exceeded its deadline");
        }
        expired
    }

    pub async fn agent_for(&self, task_id: Uuid) -> Option<Uuid> {
        self.pairings.lock().await.get(&task_id).map(|p| p.agent_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;

    struct MockRuntime {
        inject_result: AtomicBool,
    }

    #[async_trait]
    impl AgentRuntime for MockRuntime {
        async fn start(&self, _task: &Task, _agent_id: Uuid) -> anyhow::Result<ConversationHandle> {
            Ok(ConversationHandle("conv-1".into()))
        }
        async fn inject_message(&self, _handle: &ConversationHandle, _text: &str) -> anyhow::Result<bool> {
            Ok(self.inject_result.load(Ordering::SeqCst))
        }
        async fn cancel(&self, _handle: &ConversationHandle) -> anyhow::Result<bool> {
            Ok(true)
        }
    }

    fn runtime(inject_result: bool) -> Arc<MockRuntime> {
        Arc::new(MockRuntime {
            inject_result: AtomicBool::new(inject_result),
        })
    }

    #[tokio::test]
    async fn start_records_a_pairing() {
        let dispatcher = Dispatcher::new(DispatcherConfig::default(), runtime(true));
        let task = Task::new(Uuid::new_v4(), "x", "t");
        let agent_id = Uuid::new_v4();
        dispatcher.start(&task, agent_id).await.unwrap();
        assert_eq!(dispatcher.agent_for(task.id).await, Some(agent_id));
    }

    #[tokio::test]
    async fn finish_removes_the_pairing() {
        let dispatcher = Dispatcher::new(DispatcherConfig::default(), runtime(true));
        let task = Task::new(Uuid::new_v4(), "x", "t");
        dispatcher.start(&task, Uuid::new_v4()).await.unwrap();
        dispatcher.finish(task.id).await.unwrap();
        assert_eq!(dispatcher.agent_for(task.id).await, None);
    }

    #[tokio::test]
    async fn inject_message_on_unknown_task_returns_false() {
        let dispatcher = Dispatcher::new(DispatcherConfig::default(), runtime(true));
        assert!(!dispatcher.inject_message(Uuid::new_v4(), "hi").await.unwrap());
    }

    #[tokio::test]
    async fn sweep_timeouts_flags_pairings_past_their_deadline() {
        let config = DispatcherConfig {
            default_task_timeout_secs: 0,
            ..DispatcherConfig::default()
        };
        let dispatcher = Dispatcher::new(config, runtime(true));
        let task = Task::new(Uuid::new_v4(), "x", "t");
        dispatcher.start(&task, Uuid::new_v4()).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let expired = dispatcher.sweep_timeouts().await;
        assert_eq!(expired, vec![task.id]);
    }
}
