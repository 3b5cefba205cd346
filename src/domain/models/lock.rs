//! Resource lock domain model.
//!
//! The LockManager grants locks over a named `(resource_type, resource_id)`.
//! `resource_key` is a derived storage-layer column
//! (`"{resource_type}:{resource_id}"`) carrying the uniqueness lookup index;
//! callers never set it directly. A lock is active while `released_at` is
//! `None`; releasing an already-released lock is a no-op.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::common::LockMode;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceLock {
    pub id: Uuid,
    pub resource_type: String,
    pub resource_id: String,
    pub locked_by_task_id: Uuid,
    pub locked_by_agent_id: Uuid,
    pub lock_mode: LockMode,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
    pub version: u64,
}

impl ResourceLock {
    pub fn new(
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
        locked_by_task_id: Uuid,
        locked_by_agent_id: Uuid,
        lock_mode: LockMode,
        ttl_secs: Option<i64>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            locked_by_task_id,
            locked_by_agent_id,
            lock_mode,
            acquired_at: now,
            expires_at: ttl_secs.map(|ttl| now + chrono::Duration::seconds(ttl)),
            released_at: None,
            version: 0,
        }
    }

    /// Derived uniqueness key for the storage layer; never persisted
    /// independently of `resource_type`/`resource_id`.
    pub fn resource_key(&self) -> String {
        format!("{}:{}", self.resource_type, self.resource_id)
    }

    pub fn is_active(&self) -> bool {
        self.released_at.is_none()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && self.expires_at.is_some_and(|exp| now >= exp)
    }

    /// Idempotent: releasing an already-released lock is a no-op.
    pub fn release(&mut self) {
        if self.released_at.is_none() {
            self.released_at = Some(Utc::now());
            self.version += 1;
        }
    }

    /// Two active locks on the same resource conflict unless both are
    /// shared.
    pub fn conflicts_with(&self, other_mode: LockMode) -> bool {
        self.is_active() && !(self.lock_mode == LockMode::Shared && other_mode == LockMode::Shared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_key_combines_type_and_id() {
        let lock = ResourceLock::new(
            "file",
            "src/main.rs",
            Uuid::new_v4(),
            Uuid::new_v4(),
            LockMode::Exclusive,
            Some(30),
        );
        assert_eq!(lock.resource_key(), "file:src/main.rs");
    }

    #[test]
    fn no_ttl_never_expires() {
        let lock = ResourceLock::new("file", "a.txt", Uuid::new_v4(), Uuid::new_v4(), LockMode::Exclusive, None);
        assert!(!lock.is_expired(Utc::now() + chrono::Duration::days(365)));
    }

    #[test]
    fn release_is_idempotent() {
        let mut lock = ResourceLock::new("file", "a.txt", Uuid::new_v4(), Uuid::new_v4(), LockMode::Exclusive, None);
        lock.release();
        assert_eq!(lock.version, 1);
        lock.release();
        assert_eq!(lock.version, 1);
        assert!(!lock.is_active());
    }

    #[test]
    fn shared_locks_do_not_conflict_with_each_other() {
        let lock = ResourceLock::new("file", "a.txt", Uuid::new_v4(), Uuid::new_v4(), LockMode::Shared, Some(30));
        assert!(!lock.conflicts_with(LockMode::Shared));
        assert!(lock.conflicts_with(LockMode::Exclusive));
    }

    #[test]
    fn released_lock_conflicts_with_nothing() {
        let mut lock = ResourceLock::new("file", "a.txt", Uuid::new_v4(), Uuid::new_v4(), LockMode::Exclusive, Some(30));
        lock.release();
        assert!(!lock.conflicts_with(LockMode::Exclusive));
    }
}
