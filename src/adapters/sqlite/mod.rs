//! SQLite adapters for the orchestration core's persistence layer
//! (spec §4.A / SPEC_FULL.md §B).

pub mod agent_repository;
pub mod anomaly_repository;
pub mod baseline_repository;
pub mod collaboration_repository;
pub mod connection;
pub mod event_repository;
pub mod lock_repository;
pub mod migrations;
pub(crate) mod retry;
pub mod task_repository;
pub mod ticket_repository;

pub use agent_repository::SqliteAgentRepository;
pub use anomaly_repository::SqliteAnomalyScoreRepository;
pub use baseline_repository::SqliteBaselineRepository;
pub use collaboration_repository::SqliteCollaborationRepository;
pub use connection::{create_pool, create_test_pool, ConnectionError, PoolConfig};
pub use event_repository::SqliteEventRepository;
pub use lock_repository::SqliteLockRepository;
pub use migrations::{all_embedded_migrations, Migration, MigrationError, Migrator};
pub use task_repository::SqliteTaskRepository;
pub use ticket_repository::SqliteTicketRepository;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::error::{DomainError, DomainResult};

pub(crate) fn parse_uuid(s: &str) -> DomainResult<Uuid> {
    Uuid::parse_str(s).map_err(|e| DomainError::SerializationError(e.to_string()))
}

pub(crate) fn parse_optional_uuid(s: Option<String>) -> DomainResult<Option<Uuid>> {
    s.map(|s| Uuid::parse_str(&s)).transpose().map_err(|e| DomainError::SerializationError(e.to_string()))
}

pub(crate) fn parse_datetime(s: &str) -> DomainResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| DomainError::SerializationError(e.to_string()))
}

pub(crate) fn parse_optional_datetime(s: Option<String>) -> DomainResult<Option<DateTime<Utc>>> {
    s.map(|s| DateTime::parse_from_rfc3339(&s).map(|d| d.with_timezone(&Utc)))
        .transpose()
        .map_err(|e| DomainError::SerializationError(e.to_string()))
}

pub(crate) fn parse_json<T: serde::de::DeserializeOwned>(s: &str) -> DomainResult<T> {
    serde_json::from_str(s).map_err(|e| DomainError::SerializationError(e.to_string()))
}

/// Opens a migrated SQLite pool at `database_path`.
pub async fn initialize_database(database_path: &str, max_connections: u32) -> DomainResult<sqlx::SqlitePool> {
    let pool = create_pool(database_path, PoolConfig { max_connections, ..PoolConfig::default() })
        .await
        .map_err(|e| DomainError::DatabaseError(e.to_string()))?;
    let migrator = Migrator::new(pool.clone());
    migrator
        .run_embedded_migrations(all_embedded_migrations())
        .await
        .map_err(|e| DomainError::DatabaseError(e.to_string()))?;
    Ok(pool)
}

/// In-memory pool with all migrations applied, for tests.
pub async fn create_migrated_test_pool() -> DomainResult<sqlx::SqlitePool> {
    let pool = create_test_pool().await.map_err(|e| DomainError::DatabaseError(e.to_string()))?;
    let migrator = Migrator::new(pool.clone());
    migrator
        .run_embedded_migrations(all_embedded_migrations())
        .await
        .map_err(|e| DomainError::DatabaseError(e.to_string()))?;
    Ok(pool)
}
