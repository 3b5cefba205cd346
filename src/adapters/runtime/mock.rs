//! Deterministic in-memory `AgentRuntime`/`SandboxExecutor` for tests and
//! local development without a real sandbox fleet behind it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::models::Task;
use crate::domain::ports::{AgentRuntime, ConversationHandle, SandboxDeliveryError, SandboxExecutor};

/// Hands out monotonically increasing conversation handles and remembers
/// which ones are still "live" so `inject_message`/`cancel` behave
/// consistently across calls within one process.
pub struct MockAgentRuntime {
    counter: AtomicU64,
    live: Mutex<HashMap<String, bool>>,
}

impl MockAgentRuntime {
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
            live: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MockAgentRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentRuntime for MockAgentRuntime {
    async fn start(&self, _task: &Task, agent_id: Uuid) -> anyhow::Result<ConversationHandle> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let id = format!("mock-conv-{agent_id}-{n}");
        self.live.lock().unwrap().insert(id.clone(), true);
        Ok(ConversationHandle(id))
    }

    async fn inject_message(&self, handle: &ConversationHandle, _text: &str) -> anyhow::Result<bool> {
        Ok(self.live.lock().unwrap().get(&handle.0).copied().unwrap_or(false))
    }

    async fn cancel(&self, handle: &ConversationHandle) -> anyhow::Result<bool> {
        Ok(self.live.lock().unwrap().remove(&handle.0).is_some())
    }
}

/// Always succeeds; used by tests that only care about the delivery path
/// being exercised, not about a real sandbox.
pub struct MockSandboxExecutor;

#[async_trait]
impl SandboxExecutor for MockSandboxExecutor {
    async fn inject_message(&self, _sandbox_id: &str, _text: &str) -> Result<(), SandboxDeliveryError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_then_inject_succeeds_on_a_live_handle() {
        let runtime = MockAgentRuntime::new();
        let task = Task::new(Uuid::new_v4(), "x", "t");
        let handle = runtime.start(&task, Uuid::new_v4()).await.unwrap();
        assert!(runtime.inject_message(&handle, "hi").await.unwrap());
    }

    #[tokio::test]
    async fn cancel_then_inject_reports_not_live() {
        let runtime = MockAgentRuntime::new();
        let task = Task::new(Uuid::new_v4(), "x", "t");
        let handle = runtime.start(&task, Uuid::new_v4()).await.unwrap();
        assert!(runtime.cancel(&handle).await.unwrap());
        assert!(!runtime.inject_message(&handle, "hi").await.unwrap());
    }
}
