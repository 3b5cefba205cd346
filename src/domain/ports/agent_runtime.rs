//! Outbound contracts for the external agent runtime and sandbox executor
//! (spec §6). Both are opaque from the core's perspective: the core only
//! needs to start a task, inject a message into a live conversation, cancel,
//! and receive terminal results back through the Dispatcher.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::models::Task;

/// Opaque handle identifying one running (task, agent) conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationHandle(pub String);

#[derive(Debug, Clone, Error)]
pub enum SandboxDeliveryError {
    #[error("delivery timed out after {0}s")]
    Timeout(u64),
    #[error("sandbox {0} unreachable: {1}")]
    Unreachable(String, String),
    #[error("sandbox rejected message: {0}")]
    Rejected(String),
}

/// The contract the Dispatcher and Guardian use to start, message, and
/// cancel an agent's execution of a task. Sandbox provisioning and LLM
/// internals are deliberately opaque behind this trait.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    async fn start(&self, task: &Task, agent_id: uuid::Uuid) -> anyhow::Result<ConversationHandle>;

    /// Injects free text into a live conversation. Used by CollaborationBus
    /// for delivery and by Guardian for interventions. Returns `false`
    /// (not an error) if the target conversation is no longer live.
    async fn inject_message(&self, handle: &ConversationHandle, text: &str) -> anyhow::Result<bool>;

    async fn cancel(&self, handle: &ConversationHandle) -> anyhow::Result<bool>;
}

/// The contract for the optional sandbox message-injection endpoint used
/// by CollaborationBus when a task has an attached `sandbox_id`.
#[async_trait]
pub trait SandboxExecutor: Send + Sync {
    async fn inject_message(&self, sandbox_id: &str, text: &str) -> Result<(), SandboxDeliveryError>;
}
