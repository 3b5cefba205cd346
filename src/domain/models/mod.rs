//! Entity and value-object definitions for the orchestration core.

pub mod agent;
pub mod anomaly;
pub mod baseline;
pub mod collaboration;
pub mod common;
pub mod event;
pub mod lock;
pub mod monitor_anomaly;
pub mod task;
pub mod ticket;

pub use agent::{Agent, AgentStatus, HealthMetrics};
pub use anomaly::{AnomalyComponents, AnomalyScore, ANOMALY_THRESHOLD};
pub use baseline::{AgentBaseline, BaselineKey};
pub use collaboration::{AgentMessage, CollaborationThread, DeliveryMode, ThreadStatus, ThreadType};
pub use common::{LockMode, Priority, ResourceRequirement};
pub use event::{Event, EventType};
pub use lock::ResourceLock;
pub use monitor_anomaly::{AnomalyType, MonitorAnomaly, Severity};
pub use task::{Task, TaskStatus};
pub use ticket::{Ticket, TicketEstimate, TicketStatus};
