//! Collaboration domain models.
//!
//! A [`CollaborationThread`] groups related messages between agents; an
//! [`AgentMessage`] is one entry in that thread. Delivery targets the
//! recipient's in-flight task: its `sandbox_id` first, falling back to the
//! task's own `conversation_id`/`persistence_dir` pair when no sandbox is
//! attached. Messages persist regardless of delivery outcome.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadType {
    Handoff,
    Review,
    Consultation,
}

impl ThreadType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Handoff => "handoff",
            Self::Review => "review",
            Self::Consultation => "consultation",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "handoff" => Some(Self::Handoff),
            "review" => Some(Self::Review),
            "consultation" => Some(Self::Consultation),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadStatus {
    Active,
    Resolved,
    Abandoned,
}

impl ThreadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Resolved => "resolved",
            Self::Abandoned => "abandoned",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "resolved" => Some(Self::Resolved),
            "abandoned" => Some(Self::Abandoned),
            _ => None,
        }
    }
}

impl Default for ThreadStatus {
    fn default() -> Self {
        Self::Active
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollaborationThread {
    pub id: Uuid,
    pub thread_type: ThreadType,
    pub participants: Vec<Uuid>,
    pub ticket_id: Option<Uuid>,
    pub task_id: Option<Uuid>,
    pub status: ThreadStatus,
    pub closed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CollaborationThread {
    pub fn new(thread_type: ThreadType, participants: Vec<Uuid>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            thread_type,
            participants,
            ticket_id: None,
            task_id: None,
            status: ThreadStatus::default(),
            closed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_ticket(mut self, ticket_id: Uuid) -> Self {
        self.ticket_id = Some(ticket_id);
        self
    }

    pub fn with_task(mut self, task_id: Uuid) -> Self {
        self.task_id = Some(task_id);
        self
    }

    pub fn add_participant(&mut self, agent_id: Uuid) {
        if !self.participants.contains(&agent_id) {
            self.participants.push(agent_id);
            self.updated_at = Utc::now();
        }
    }

    pub fn close(&mut self) {
        let now = Utc::now();
        self.status = ThreadStatus::Resolved;
        self.closed_at = Some(now);
        self.updated_at = now;
    }

    pub fn abandon(&mut self) {
        let now = Utc::now();
        self.status = ThreadStatus::Abandoned;
        self.closed_at = Some(now);
        self.updated_at = now;
    }
}

/// Out-of-band delivery target resolved for a message, recorded so retries
/// reuse the same addressing mode rather than re-deriving it each attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    Sandbox,
    ConversationResume,
    Undeliverable,
}

impl DeliveryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sandbox => "sandbox",
            Self::ConversationResume => "conversation_resume",
            Self::Undeliverable => "undeliverable",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "sandbox" => Some(Self::Sandbox),
            "conversation_resume" => Some(Self::ConversationResume),
            "undeliverable" => Some(Self::Undeliverable),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    pub id: Uuid,
    pub thread_id: Uuid,
    pub from_agent_id: Uuid,
    /// `None` means broadcast to every other participant in the thread.
    pub to_agent_id: Option<Uuid>,
    pub message_type: String,
    pub content: String,
    pub metadata: Option<serde_json::Value>,
    pub read_at: Option<DateTime<Utc>>,

    pub delivery_mode: Option<DeliveryMode>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub delivery_error: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl AgentMessage {
    pub fn new(
        thread_id: Uuid,
        from_agent_id: Uuid,
        to_agent_id: Option<Uuid>,
        message_type: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            thread_id,
            from_agent_id,
            to_agent_id,
            message_type: message_type.into(),
            content: content.into(),
            metadata: None,
            read_at: None,
            delivery_mode: None,
            delivered_at: None,
            delivery_error: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn is_broadcast(&self) -> bool {
        self.to_agent_id.is_none()
    }

    pub fn mark_read(&mut self) {
        self.read_at = Some(Utc::now());
    }

    pub fn mark_delivered(&mut self, mode: DeliveryMode) {
        self.delivery_mode = Some(mode);
        self.delivered_at = Some(Utc::now());
        self.delivery_error = None;
    }

    pub fn mark_delivery_failed(&mut self, error: impl Into<String>) {
        self.delivery_mode = Some(DeliveryMode::Undeliverable);
        self.delivery_error = Some(error.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_thread_defaults_to_active() {
        let t = CollaborationThread::new(ThreadType::Handoff, vec![Uuid::new_v4()]);
        assert_eq!(t.status, ThreadStatus::Active);
        assert!(t.closed_at.is_none());
    }

    #[test]
    fn add_participant_is_idempotent() {
        let agent = Uuid::new_v4();
        let mut t = CollaborationThread::new(ThreadType::Review, vec![agent]);
        t.add_participant(agent);
        assert_eq!(t.participants.len(), 1);
    }

    #[test]
    fn close_sets_resolved_and_timestamp() {
        let mut t = CollaborationThread::new(ThreadType::Consultation, vec![]);
        t.close();
        assert_eq!(t.status, ThreadStatus::Resolved);
        assert!(t.closed_at.is_some());
    }

    #[test]
    fn message_with_no_recipient_is_broadcast() {
        let m = AgentMessage::new(Uuid::new_v4(), Uuid::new_v4(), None, "info", "hello");
        assert!(m.is_broadcast());
    }

    #[test]
    fn mark_delivered_clears_prior_error() {
        let mut m = AgentMessage::new(Uuid::new_v4(), Uuid::new_v4(), Some(Uuid::new_v4()), "info", "hi");
        m.mark_delivery_failed("timeout");
        assert!(m.delivery_error.is_some());
        m.mark_delivered(DeliveryMode::Sandbox);
        assert!(m.delivery_error.is_none());
        assert!(m.delivered_at.is_some());
    }
}
