//! Core orchestration services (spec §4). Each service is constructed over
//! `Arc<dyn ...Repository>` port trait objects so the SQLite adapters and
//! the in-memory test doubles are interchangeable.

pub mod anomaly_scorer;
pub mod baseline_learner;
pub mod collaboration_bus;
pub mod dispatcher;
pub mod event_bus;
pub mod guardian;
pub mod lock_manager;
pub mod monitor;
pub mod orchestrator;
pub mod priority_scorer;

pub use anomaly_scorer::AnomalyScorer;
pub use baseline_learner::BaselineLearner;
pub use collaboration_bus::CollaborationBus;
pub use dispatcher::Dispatcher;
pub use event_bus::{EventBus, EventSubscription};
pub use guardian::Guardian;
pub use lock_manager::LockManager;
pub use monitor::Monitor;
pub use orchestrator::Orchestrator;
pub use priority_scorer::PriorityScorer;
