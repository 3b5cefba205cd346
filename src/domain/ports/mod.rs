//! Outbound contracts the domain depends on: persistence and the external
//! agent/sandbox runtime. Services are generic over these traits so the
//! SQLite adapters and the mock runtime adapters are interchangeable in
//! tests.

pub mod agent_runtime;
pub mod store;

pub use agent_runtime::{AgentRuntime, ConversationHandle, SandboxDeliveryError, SandboxExecutor};
pub use store::{
    AgentRepository, AnomalyScoreRepository, BaselineRepository, CollaborationRepository,
    EventRepository, LockRepository, TaskRepository, TicketRepository,
};
