//! CollaborationBus service (spec §4.I).
//!
//! Threads group related messages; messages persist regardless of delivery
//! outcome, with out-of-band delivery attempted best-effort against the
//! recipient's in-flight task (sandbox first, conversation resume second).

use std::sync::Arc;

use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use crate::domain::error::{DomainError, DomainResult};
use crate::domain::models::{
    AgentMessage, CollaborationThread, DeliveryMode, Event, EventType, Task, ThreadType,
};
use crate::domain::ports::{
    AgentRuntime, CollaborationRepository, SandboxDeliveryError, SandboxExecutor, TaskRepository,
};
use crate::services::event_bus::EventBus;

fn short_id(id: Uuid) -> String {
    id.to_string().chars().take(8).collect()
}

pub struct CollaborationBus {
    repo: Arc<dyn CollaborationRepository>,
    task_repo: Arc<dyn TaskRepository>,
    sandbox: Arc<dyn SandboxExecutor>,
    runtime: Arc<dyn AgentRuntime>,
    event_bus: EventBus,
}

impl CollaborationBus {
    pub fn new(
        repo: Arc<dyn CollaborationRepository>,
        task_repo: Arc<dyn TaskRepository>,
        sandbox: Arc<dyn SandboxExecutor>,
        runtime: Arc<dyn AgentRuntime>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            repo,
            task_repo,
            sandbox,
            runtime,
            event_bus,
        }
    }

    pub async fn create_thread(
        &self,
        thread_type: ThreadType,
        participants: Vec<Uuid>,
        ticket_id: Option<Uuid>,
        task_id: Option<Uuid>,
    ) -> DomainResult<CollaborationThread> {
        let mut thread = CollaborationThread::new(thread_type, participants);
        if let Some(ticket_id) = ticket_id {
            thread = thread.with_ticket(ticket_id);
        }
        if let Some(task_id) = task_id {
            thread = thread.with_task(task_id);
        }
        self.repo.insert_thread(&thread).await?;
        Ok(thread)
    }

    /// Persists a message and publishes `agent.message.sent`, then attempts
    /// best-effort out-of-band delivery if `to_agent_id` is set. Delivery
    /// failures are logged but never fail the send.
    pub async fn send_message(
        &self,
        thread_id: Uuid,
        from_agent_id: Uuid,
        to_agent_id: Option<Uuid>,
        message_type: impl Into<String>,
        content: impl Into<String>,
        metadata: Option<serde_json::Value>,
    ) -> DomainResult<AgentMessage> {
        let mut message = AgentMessage::new(thread_id, from_agent_id, to_agent_id, message_type, content);
        if let Some(metadata) = metadata {
            message = message.with_metadata(metadata);
        }
        self.repo.insert_message(&message).await?;

        self.event_bus
            .publish(Event::new(
                EventType::AgentMessageSent,
                "message",
                message.id,
                json!({
                    "thread_id": thread_id,
                    "from_agent_id": from_agent_id,
                    "to_agent_id": to_agent_id,
                    "broadcast": message.is_broadcast(),
                }),
            ))
            .await?;

        match to_agent_id {
            Some(to_agent_id) => {
                self.attempt_delivery(&mut message, from_agent_id, to_agent_id).await;
                self.repo.update_message(&message).await?;
            }
            // A broadcast message addresses no single recipient, but every
            // other thread participant with a live target still gets a
            // best-effort out-of-band delivery attempt; the message stays
            // one row regardless of how many attempts were made.
            None => {
                if let Some(thread) = self.repo.get_thread(thread_id).await? {
                    for participant in thread.participants.iter().copied().filter(|id| *id != from_agent_id) {
                        self.attempt_delivery(&mut message, from_agent_id, participant).await;
                    }
                    self.repo.update_message(&message).await?;
                }
            }
        }

        Ok(message)
    }

    /// Creates or locates a thread containing every currently-active agent
    /// other than `from_agent_id`, then sends a single `to=null` message
    /// tagged `{broadcast: true}`.
    pub async fn broadcast(
        &self,
        from_agent_id: Uuid,
        active_agent_ids: &[Uuid],
        content: impl Into<String>,
    ) -> DomainResult<AgentMessage> {
        let participants: Vec<Uuid> = active_agent_ids.iter().copied().filter(|id| *id != from_agent_id).collect();

        let thread = match self.repo.find_thread_for_participants(&participants).await? {
            Some(thread) => thread,
            None => self.create_thread(ThreadType::Consultation, participants, None, None).await?,
        };

        self.send_message(
            thread.id,
            from_agent_id,
            None,
            "broadcast",
            content,
            Some(json!({"broadcast": true, "recipient_count": participants.len()})),
        )
        .await
    }

    /// `(a) task.sandbox_id present -> sandbox injection; (b)
    /// conversation_id + persistence_dir present -> resume via AgentRuntime.`
    /// Neither target present, or both fail: message stays undeliverable
    /// but persisted.
    async fn attempt_delivery(&self, message: &mut AgentMessage, from_agent_id: Uuid, to_agent_id: Uuid) {
        let Ok(Some(task)) = self.target_task_for(to_agent_id).await else {
            return;
        };

        let label = if message.is_broadcast() {
            format!("[AGENT {} → BROADCAST]: {}", short_id(from_agent_id), message.content)
        } else {
            format!("[AGENT {} → AGENT {}]: {}", short_id(from_agent_id), short_id(to_agent_id), message.content)
        };

        if let Some(sandbox_id) = &task.sandbox_id {
            match self.sandbox.inject_message(sandbox_id, &label).await {
                Ok(()) => message.mark_delivered(DeliveryMode::Sandbox),
                Err(err) => self.log_and_mark_failed(message, err),
            }
            return;
        }

        if let (Some(conversation_id), Some(_persistence_dir)) = (&task.conversation_id, &task.persistence_dir) {
            let handle = crate::domain::ports::ConversationHandle(conversation_id.clone());
            match self.runtime.inject_message(&handle, &label).await {
                Ok(true) => message.mark_delivered(DeliveryMode::ConversationResume),
                Ok(false) => message.mark_delivery_failed("conversation no longer live"),
                Err(err) => message.mark_delivery_failed(err.to_string()),
            }
        }
    }

    fn log_and_mark_failed(&self, message: &mut AgentMessage, err: SandboxDeliveryError) {
        warn!(message_id = %message.id, error = %err, "sandbox message delivery failed");
        message.mark_delivery_failed(err.to_string());
    }

    async fn target_task_for(&self, agent_id: Uuid) -> DomainResult<Option<Task>> {
        let running = self.task_repo.list_by_agent(agent_id, Some(crate::domain::models::TaskStatus::Running)).await?;
        Ok(running.into_iter().next())
    }

    /// 1. Creates a handoff thread and sends `handoff_request`.
    pub async fn request_handoff(
        &self,
        from_agent_id: Uuid,
        to_agent_id: Uuid,
        task_id: Uuid,
        reason: impl Into<String>,
        context: Option<serde_json::Value>,
    ) -> DomainResult<CollaborationThread> {
        let thread = self
            .create_thread(ThreadType::Handoff, vec![from_agent_id, to_agent_id], None, Some(task_id))
            .await?;
        self.send_message(
            thread.id,
            from_agent_id,
            Some(to_agent_id),
            "handoff_request",
            reason.into(),
            context,
        )
        .await?;
        self.event_bus
            .publish(Event::new(
                EventType::AgentHandoffRequested,
                "thread",
                thread.id,
                json!({"from_agent_id": from_agent_id, "to_agent_id": to_agent_id, "task_id": task_id}),
            ))
            .await?;
        Ok(thread)
    }

    pub async fn accept_handoff(&self, thread_id: Uuid, accepting_agent_id: Uuid) -> DomainResult<()> {
        let thread = self.repo.get_thread(thread_id).await?.ok_or(DomainError::ThreadNotFound(thread_id))?;
        self.send_message(thread_id, accepting_agent_id, None, "handoff_accepted", "accepted", None)
            .await?;
        self.event_bus
            .publish(Event::new(
                EventType::AgentHandoffAccepted,
                "thread",
                thread_id,
                json!({"accepting_agent_id": accepting_agent_id, "task_id": thread.task_id}),
            ))
            .await?;
        Ok(())
    }

    pub async fn decline_handoff(
        &self,
        thread_id: Uuid,
        declining_agent_id: Uuid,
        reason: impl Into<String>,
    ) -> DomainResult<()> {
        let reason = reason.into();
        self.send_message(thread_id, declining_agent_id, None, "handoff_declined", reason.clone(), None)
            .await?;
        self.event_bus
            .publish(Event::new(
                EventType::AgentHandoffDeclined,
                "thread",
                thread_id,
                json!({"declining_agent_id": declining_agent_id, "reason": reason}),
            ))
            .await?;
        Ok(())
    }

    pub async fn close_thread(&self, thread_id: Uuid) -> DomainResult<()> {
        let mut thread = self.repo.get_thread(thread_id).await?.ok_or(DomainError::ThreadNotFound(thread_id))?;
        thread.close();
        self.repo.update_thread(&thread).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;

    use crate::domain::models::TaskStatus;
    use crate::domain::ports::EventRepository;

    struct NoopEventRepo;
    #[async_trait]
    impl EventRepository for NoopEventRepo {
        async fn insert(&self, _event: &Event) -> DomainResult<()> {
            Ok(())
        }
        async fn list_for_entity(&self, _entity_id: Uuid) -> DomainResult<Vec<Event>> {
            Ok(vec![])
        }
        async fn list_recent(&self, _limit: u32) -> DomainResult<Vec<Event>> {
            Ok(vec![])
        }
    }

    #[derive(Default)]
    struct InMemoryCollaborationRepository {
        threads: StdMutex<HashMap<Uuid, CollaborationThread>>,
        messages: StdMutex<HashMap<Uuid, AgentMessage>>,
    }

    #[async_trait]
    impl CollaborationRepository for InMemoryCollaborationRepository {
        async fn insert_thread(&self, thread: &CollaborationThread) -> DomainResult<()> {
            self.threads.lock().unwrap().insert(thread.id, thread.clone());
            Ok(())
        }
        async fn get_thread(&self, id: Uuid) -> DomainResult<Option<CollaborationThread>> {
            Ok(self.threads.lock().unwrap().get(&id).cloned())
        }
        async fn update_thread(&self, thread: &CollaborationThread) -> DomainResult<()> {
            self.threads.lock().unwrap().insert(thread.id, thread.clone());
            Ok(())
        }
        async fn find_thread_for_participants(&self, participants: &[Uuid]) -> DomainResult<Option<CollaborationThread>> {
            let mut wanted: Vec<Uuid> = participants.to_vec();
            wanted.sort();
            Ok(self.threads.lock().unwrap().values().find(|t| {
                let mut have = t.participants.clone();
                have.sort();
                have == wanted
            }).cloned())
        }
        async fn insert_message(&self, message: &AgentMessage) -> DomainResult<()> {
            self.messages.lock().unwrap().insert(message.id, message.clone());
            Ok(())
        }
        async fn update_message(&self, message: &AgentMessage) -> DomainResult<()> {
            self.messages.lock().unwrap().insert(message.id, message.clone());
            Ok(())
        }
        async fn list_messages(&self, thread_id: Uuid) -> DomainResult<Vec<AgentMessage>> {
            Ok(self.messages.lock().unwrap().values().filter(|m| m.thread_id == thread_id).cloned().collect())
        }
    }

    #[derive(Default)]
    struct InMemoryTaskRepository {
        tasks: StdMutex<HashMap<Uuid, Task>>,
    }
    impl InMemoryTaskRepository {
        fn seed(&self, task: Task) {
            self.tasks.lock().unwrap().insert(task.id, task);
        }
    }
    #[async_trait]
    impl TaskRepository for InMemoryTaskRepository {
        async fn insert(&self, task: &Task, _d: &[Uuid]) -> DomainResult<()> {
            self.tasks.lock().unwrap().insert(task.id, task.clone());
            Ok(())
        }
        async fn get(&self, id: Uuid) -> DomainResult<Option<Task>> {
            Ok(self.tasks.lock().unwrap().get(&id).cloned())
        }
        async fn update(&self, task: &Task) -> DomainResult<()> {
            self.tasks.lock().unwrap().insert(task.id, task.clone());
            Ok(())
        }
        async fn depends_on(&self, _id: Uuid) -> DomainResult<Vec<Uuid>> {
            Ok(vec![])
        }
        async fn dependents_of(&self, _id: Uuid) -> DomainResult<Vec<Uuid>> {
            Ok(vec![])
        }
        async fn ready_set(&self) -> DomainResult<Vec<Task>> {
            Ok(vec![])
        }
        async fn list_by_status(&self, _s: TaskStatus) -> DomainResult<Vec<Task>> {
            Ok(vec![])
        }
        async fn list_by_agent(&self, agent_id: Uuid, status: Option<TaskStatus>) -> DomainResult<Vec<Task>> {
            Ok(self
                .tasks
                .lock()
                .unwrap()
                .values()
                .filter(|t| t.assigned_agent_id == Some(agent_id) && status.is_none_or(|s| t.status == s))
                .cloned()
                .collect())
        }
        async fn list_by_ticket(&self, _t: Uuid) -> DomainResult<Vec<Task>> {
            Ok(vec![])
        }
    }

    struct NoopSandbox;
    #[async_trait]
    impl SandboxExecutor for NoopSandbox {
        async fn inject_message(&self, _sandbox_id: &str, _text: &str) -> Result<(), SandboxDeliveryError> {
            Ok(())
        }
    }

    struct FailingSandbox;
    #[async_trait]
    impl SandboxExecutor for FailingSandbox {
        async fn inject_message(&self, sandbox_id: &str, _text: &str) -> Result<(), SandboxDeliveryError> {
            Err(SandboxDeliveryError::Unreachable(sandbox_id.to_string(), "connection refused".into()))
        }
    }

    #[derive(Default)]
    struct CountingSandbox {
        calls: std::sync::atomic::AtomicUsize,
    }
    impl CountingSandbox {
        fn calls(&self) -> usize {
            self.calls.load(std::sync::atomic::Ordering::SeqCst)
        }
    }
    #[async_trait]
    impl SandboxExecutor for CountingSandbox {
        async fn inject_message(&self, _sandbox_id: &str, _text: &str) -> Result<(), SandboxDeliveryError> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }
    }

    struct NoopRuntime;
    #[async_trait]
    impl AgentRuntime for NoopRuntime {
        async fn start(&self, _task: &Task, _agent_id: Uuid) -> anyhow::Result<crate::domain::ports::ConversationHandle> {
            Ok(crate::domain::ports::ConversationHandle("conv".into()))
        }
        async fn inject_message(&self, _handle: &crate::domain::ports::ConversationHandle, _text: &str) -> anyhow::Result<bool> {
            Ok(true)
        }
        async fn cancel(&self, _handle: &crate::domain::ports::ConversationHandle) -> anyhow::Result<bool> {
            Ok(true)
        }
    }

    fn bus(
        task_repo: Arc<InMemoryTaskRepository>,
        sandbox: Arc<dyn SandboxExecutor>,
    ) -> CollaborationBus {
        CollaborationBus::new(
            Arc::new(InMemoryCollaborationRepository::default()),
            task_repo,
            sandbox,
            Arc::new(NoopRuntime),
            EventBus::new(64, Arc::new(NoopEventRepo)),
        )
    }

    #[tokio::test]
    async fn send_message_persists_even_without_a_delivery_target() {
        let task_repo = Arc::new(InMemoryTaskRepository::default());
        let bus = bus(task_repo, Arc::new(NoopSandbox));
        let thread = bus.create_thread(ThreadType::Consultation, vec![Uuid::new_v4()], None, None).await.unwrap();
        let message = bus
            .send_message(thread.id, Uuid::new_v4(), Some(Uuid::new_v4()), "info", "hi", None)
            .await
            .unwrap();
        assert!(message.delivery_mode.is_none());
    }

    #[tokio::test]
    async fn send_message_delivers_via_sandbox_when_target_task_has_one() {
        let task_repo = Arc::new(InMemoryTaskRepository::default());
        let to_agent = Uuid::new_v4();
        let mut task = Task::new(Uuid::new_v4(), "x", "t");
        task.assigned_agent_id = Some(to_agent);
        task.status = TaskStatus::Running;
        task.sandbox_id = Some("sbx-1".to_string());
        task_repo.seed(task);

        let bus = bus(task_repo, Arc::new(NoopSandbox));
        let thread = bus.create_thread(ThreadType::Review, vec![Uuid::new_v4(), to_agent], None, None).await.unwrap();
        let message = bus.send_message(thread.id, Uuid::new_v4(), Some(to_agent), "info", "hi", None).await.unwrap();
        assert_eq!(message.delivery_mode, Some(DeliveryMode::Sandbox));
    }

    #[tokio::test]
    async fn sandbox_failure_marks_message_undeliverable_without_erroring_the_send() {
        let task_repo = Arc::new(InMemoryTaskRepository::default());
        let to_agent = Uuid::new_v4();
        let mut task = Task::new(Uuid::new_v4(), "x", "t");
        task.assigned_agent_id = Some(to_agent);
        task.status = TaskStatus::Running;
        task.sandbox_id = Some("sbx-1".to_string());
        task_repo.seed(task);

        let bus = bus(task_repo, Arc::new(FailingSandbox));
        let thread = bus.create_thread(ThreadType::Review, vec![Uuid::new_v4(), to_agent], None, None).await.unwrap();
        let message = bus.send_message(thread.id, Uuid::new_v4(), Some(to_agent), "info", "hi", None).await.unwrap();
        assert_eq!(message.delivery_mode, Some(DeliveryMode::Undeliverable));
        assert!(message.delivery_error.is_some());
    }

    #[tokio::test]
    async fn broadcast_excludes_sender_from_participants() {
        let task_repo = Arc::new(InMemoryTaskRepository::default());
        let bus = bus(task_repo, Arc::new(NoopSandbox));
        let sender = Uuid::new_v4();
        let others = vec![sender, Uuid::new_v4(), Uuid::new_v4()];
        let message = bus.broadcast(sender, &others, "status update").await.unwrap();
        assert!(message.is_broadcast());
    }

    #[tokio::test]
    async fn broadcast_stamps_recipient_count_and_attempts_delivery_to_each_participant() {
        let task_repo = Arc::new(InMemoryTaskRepository::default());
        let sender = Uuid::new_v4();
        let with_sandbox = Uuid::new_v4();
        let without_target = Uuid::new_v4();

        let mut running = Task::new(Uuid::new_v4(), "x", "t");
        running.assigned_agent_id = Some(with_sandbox);
        running.status = TaskStatus::Running;
        running.sandbox_id = Some("sbx-1".to_string());
        task_repo.seed(running);

        let sandbox = Arc::new(CountingSandbox::default());
        let bus = bus(task_repo, sandbox.clone());
        let recipients = vec![sender, with_sandbox, without_target];

        let message = bus.broadcast(sender, &recipients, "hello").await.unwrap();

        assert_eq!(message.metadata.as_ref().unwrap()["recipient_count"], json!(2));
        assert_eq!(sandbox.calls(), 1);
    }

    #[tokio::test]
    async fn handoff_protocol_emits_request_then_accept() {
        let task_repo = Arc::new(InMemoryTaskRepository::default());
        let bus = bus(task_repo, Arc::new(NoopSandbox));
        let from = Uuid::new_v4();
        let to = Uuid::new_v4();
        let task_id = Uuid::new_v4();

        let thread = bus.request_handoff(from, to, task_id, "need review", None).await.unwrap();
        assert_eq!(thread.thread_type, ThreadType::Handoff);
        bus.accept_handoff(thread.id, to).await.unwrap();

        let messages = bus.repo.list_messages(thread.id).await.unwrap();
        assert_eq!(messages.len(), 2);
    }

    #[tokio::test]
    async fn decline_handoff_emits_declined_message() {
        let task_repo = Arc::new(InMemoryTaskRepository::default());
        let bus = bus(task_repo, Arc::new(NoopSandbox));
        let from = Uuid::new_v4();
        let to = Uuid::new_v4();
        let thread = bus.request_handoff(from, to, Uuid::new_v4(), "need review", None).await.unwrap();
        bus.decline_handoff(thread.id, to, "too busy").await.unwrap();
        let messages = bus.repo.list_messages(thread.id).await.unwrap();
        assert_eq!(messages.len(), 2);
    }

    #[tokio::test]
    async fn close_thread_marks_resolved() {
        let task_repo = Arc::new(InMemoryTaskRepository::default());
        let bus = bus(task_repo, Arc::new(NoopSandbox));
        let thread = bus.create_thread(ThreadType::Consultation, vec![], None, None).await.unwrap();
        bus.close_thread(thread.id).await.unwrap();
        let reloaded = bus.repo.get_thread(thread.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, crate::domain::models::ThreadStatus::Resolved);
    }
}
