//! LockManager service (spec §4.C).
//!
//! Acquisition is non-blocking: contention is a normal outcome (`Ok(None)`),
//! never an error. A single `tokio::sync::Mutex` serializes the
//! read-active-locks-then-insert critical section; this is sufficient
//! because the system assumes a single-leader orchestrator instance (no
//! distributed consensus across replicas, per spec §1's Non-goals) — there
//! is exactly one `LockManager` guarding any given `Store`.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::error::DomainResult;
use crate::domain::models::{LockMode, ResourceLock};
use crate::domain::ports::LockRepository;

pub struct LockManager {
    repo: Arc<dyn LockRepository>,
    critical_section: Mutex<()>,
}

impl LockManager {
    pub fn new(repo: Arc<dyn LockRepository>) -> Self {
        Self {
            repo,
            critical_section: Mutex::new(()),
        }
    }

    /// Attempts to acquire a lock. Returns `Ok(None)` on contention rather
    /// than an error — the caller reschedules and tries again later.
    pub async fn acquire(
        &self,
        resource_type: &str,
        resource_id: &str,
        task_id: Uuid,
        agent_id: Uuid,
        mode: LockMode,
        ttl_secs: Option<i64>,
    ) -> DomainResult<Option<ResourceLock>> {
        let _guard = self.critical_section.lock().await;

        let active = self.repo.active_for_resource(resource_type, resource_id).await?;
        let compatible = match mode {
            LockMode::Exclusive => active.is_empty(),
            LockMode::Shared => active.iter().all(|l| l.lock_mode == LockMode::Shared),
        };

        if !compatible {
            return Ok(None);
        }

        let lock = ResourceLock::new(resource_type, resource_id, task_id, agent_id, mode, ttl_secs);
        self.repo.insert(&lock).await?;
        info!(
            lock_id = %lock.id,
            resource_type,
            resource_id,
            task_id = %task_id,
            mode = mode.as_str(),
            "lock acquired"
        );
        Ok(Some(lock))
    }

    /// Acquires every requirement in `requirements`, in the order given
    /// (callers are expected to have sorted by `(resource_type, resource_id)`
    /// to avoid wait-for cycles, per spec §4.H). On the first failure,
    /// releases everything already acquired and returns `Ok(None)`.
    pub async fn acquire_all(
        &self,
        requirements: &[(String, String, LockMode)],
        task_id: Uuid,
        agent_id: Uuid,
        ttl_secs: Option<i64>,
    ) -> DomainResult<Option<Vec<ResourceLock>>> {
        let mut acquired = Vec::with_capacity(requirements.len());
        for (resource_type, resource_id, mode) in requirements {
            match self
                .acquire(resource_type, resource_id, task_id, agent_id, *mode, ttl_secs)
                .await?
            {
                Some(lock) => acquired.push(lock),
                None => {
                    for lock in &acquired {
                        self.release(lock.id).await?;
                    }
                    return Ok(None);
                }
            }
        }
        Ok(Some(acquired))
    }

    /// Idempotent: releasing an already-released lock returns `true`
    /// without side effects.
    pub async fn release(&self, lock_id: Uuid) -> DomainResult<bool> {
        let Some(mut lock) = self.repo.get(lock_id).await? else {
            return Ok(false);
        };
        if !lock.is_active() {
            return Ok(true);
        }
        lock.release();
        self.repo.update(&lock).await?;
        info!(lock_id = %lock_id, resource_key = lock.resource_key(), "lock released");
        Ok(true)
    }

    /// Releases every active lock held by `task_id`. Always invoked on a
    /// task's terminal transition.
    pub async fn release_task_locks(&self, task_id: Uuid) -> DomainResult<u32> {
        let locks = self.repo.active_for_task(task_id).await?;
        let mut count = 0;
        for mut lock in locks {
            lock.release();
            self.repo.update(&lock).await?;
            count += 1;
        }
        Ok(count)
    }

    /// Periodic sweep: releases locks past `expires_at`. Returns the count
    /// released so the caller can emit `lock.expired` events.
    pub async fn cleanup_expired(&self) -> DomainResult<Vec<ResourceLock>> {
        let now = Utc::now();
        let expired = self.repo.list_expired(now).await?;
        let mut released = Vec::with_capacity(expired.len());
        for mut lock in expired {
            lock.release();
            self.repo.update(&lock).await?;
            warn!(lock_id = %lock.id, resource_key = lock.resource_key(), "lock expired and released");
            released.push(lock);
        }
        Ok(released)
    }

    pub async fn is_locked(&self, resource_type: &str, resource_id: &str) -> DomainResult<bool> {
        Ok(!self.repo.active_for_resource(resource_type, resource_id).await?.is_empty())
    }

    pub async fn list_active(&self) -> DomainResult<Vec<ResourceLock>> {
        self.repo.list_active().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use chrono::DateTime;

    #[derive(Default)]
    struct InMemoryLockRepository {
        locks: StdMutex<HashMap<Uuid, ResourceLock>>,
    }

    #[async_trait]
    impl LockRepository for InMemoryLockRepository {
        async fn insert(&self, lock: &ResourceLock) -> DomainResult<()> {
            self.locks.lock().unwrap().insert(lock.id, lock.clone());
            Ok(())
        }

        async fn get(&self, id: Uuid) -> DomainResult<Option<ResourceLock>> {
            Ok(self.locks.lock().unwrap().get(&id).cloned())
        }

        async fn update(&self, lock: &ResourceLock) -> DomainResult<()> {
            self.locks.lock().unwrap().insert(lock.id, lock.clone());
            Ok(())
        }

        async fn active_for_resource(&self, resource_type: &str, resource_id: &str) -> DomainResult<Vec<ResourceLock>> {
            Ok(self
                .locks
                .lock()
                .unwrap()
                .values()
                .filter(|l| l.is_active() && l.resource_type == resource_type && l.resource_id == resource_id)
                .cloned()
                .collect())
        }

        async fn active_for_task(&self, task_id: Uuid) -> DomainResult<Vec<ResourceLock>> {
            Ok(self
                .locks
                .lock()
                .unwrap()
                .values()
                .filter(|l| l.is_active() && l.locked_by_task_id == task_id)
                .cloned()
                .collect())
        }

        async fn list_active(&self) -> DomainResult<Vec<ResourceLock>> {
            Ok(self.locks.lock().unwrap().values().filter(|l| l.is_active()).cloned().collect())
        }

        async fn list_expired(&self, now: DateTime<Utc>) -> DomainResult<Vec<ResourceLock>> {
            Ok(self.locks.lock().unwrap().values().filter(|l| l.is_expired(now)).cloned().collect())
        }
    }

    fn manager() -> LockManager {
        LockManager::new(Arc::new(InMemoryLockRepository::default()))
    }

    #[tokio::test]
    async fn exclusive_lock_blocks_a_second_exclusive_request() {
        let mgr = manager();
        let first = mgr
            .acquire("file", "/a.txt", Uuid::new_v4(), Uuid::new_v4(), LockMode::Exclusive, None)
            .await
            .unwrap();
        assert!(first.is_some());

        let second = mgr
            .acquire("file", "/a.txt", Uuid::new_v4(), Uuid::new_v4(), LockMode::Exclusive, None)
            .await
            .unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn shared_locks_stack() {
        let mgr = manager();
        let a = mgr
            .acquire("file", "/a.txt", Uuid::new_v4(), Uuid::new_v4(), LockMode::Shared, None)
            .await
            .unwrap();
        let b = mgr
            .acquire("file", "/a.txt", Uuid::new_v4(), Uuid::new_v4(), LockMode::Shared, None)
            .await
            .unwrap();
        assert!(a.is_some());
        assert!(b.is_some());
    }

    #[tokio::test]
    async fn release_then_acquire_round_trips_active_set() {
        let mgr = manager();
        let task_id = Uuid::new_v4();
        let lock = mgr
            .acquire("file", "/a.txt", task_id, Uuid::new_v4(), LockMode::Exclusive, None)
            .await
            .unwrap()
            .unwrap();
        assert!(mgr.is_locked("file", "/a.txt").await.unwrap());
        assert!(mgr.release(lock.id).await.unwrap());
        assert!(!mgr.is_locked("file", "/a.txt").await.unwrap());
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let mgr = manager();
        let lock = mgr
            .acquire("file", "/a.txt", Uuid::new_v4(), Uuid::new_v4(), LockMode::Exclusive, None)
            .await
            .unwrap()
            .unwrap();
        assert!(mgr.release(lock.id).await.unwrap());
        assert!(mgr.release(lock.id).await.unwrap());
    }

    #[tokio::test]
    async fn release_unknown_lock_returns_false() {
        let mgr = manager();
        assert!(!mgr.release(Uuid::new_v4()).await.unwrap());
    }

    #[tokio::test]
    async fn acquire_all_rolls_back_partial_acquisition_on_conflict() {
        let mgr = manager();
        let blocker_task = Uuid::new_v4();
        mgr.acquire("file", "/b.txt", blocker_task, Uuid::new_v4(), LockMode::Exclusive, None)
            .await
            .unwrap();

        let requirements = vec![
            ("file".to_string(), "/a.txt".to_string(), LockMode::Exclusive),
            ("file".to_string(), "/b.txt".to_string(), LockMode::Exclusive),
        ];
        let result = mgr.acquire_all(&requirements, Uuid::new_v4(), Uuid::new_v4(), None).await.unwrap();
        assert!(result.is_none());
        assert!(!mgr.is_locked("file", "/a.txt").await.unwrap());
    }

    #[tokio::test]
    async fn release_task_locks_releases_every_lock_for_that_task() {
        let mgr = manager();
        let task_id = Uuid::new_v4();
        let agent_id = Uuid::new_v4();
        mgr.acquire("file", "/a.txt", task_id, agent_id, LockMode::Exclusive, None).await.unwrap();
        mgr.acquire("file", "/b.txt", task_id, agent_id, LockMode::Shared, None).await.unwrap();
        let released = mgr.release_task_locks(task_id).await.unwrap();
        assert_eq!(released, 2);
    }
}
