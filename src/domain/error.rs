//! Domain-level errors shared by services and adapters.

use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur while operating on OmoiOS core entities.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("ticket not found: {0}")]
    TicketNotFound(Uuid),

    #[error("task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("agent not found: {0}")]
    AgentNotFound(Uuid),

    #[error("resource lock not found: {0}")]
    LockNotFound(Uuid),

    #[error("collaboration thread not found: {0}")]
    ThreadNotFound(Uuid),

    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("dependency cycle detected involving task: {0}")]
    DependencyCycle(Uuid),

    #[error("parent ticket not found: {0}")]
    ParentMissing(Uuid),

    #[error("task is not cancellable in status {0}")]
    NotCancellable(String),

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("concurrency conflict: {entity} {id} was modified concurrently")]
    ConcurrencyConflict { entity: &'static str, id: String },

    #[error("database error: {0}")]
    DatabaseError(String),

    #[error("serialization error: {0}")]
    SerializationError(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}
