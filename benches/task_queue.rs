//! Criterion benchmarks for the LockManager's acquire/release path, which
//! sits on the hot path of every Orchestrator tick.
//!
//! Run with:
//!   cargo bench --bench task_queue

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use tokio::runtime::Runtime;
use uuid::Uuid;

use omoios_core::domain::error::DomainResult;
use omoios_core::domain::models::{LockMode, ResourceLock};
use omoios_core::domain::ports::LockRepository;
use omoios_core::services::LockManager;

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
        Ok(self.locks.lock().unwrap().values().filter(|l| l.is_active() && l.locked_by_task_id == task_id).cloned().collect())
    }
    async fn list_active(&self) -> DomainResult<Vec<ResourceLock>> {
        Ok(self.locks.lock().unwrap().values().filter(|l| l.is_active()).cloned().collect())
    }
    async fn list_expired(&self, now: DateTime<Utc>) -> DomainResult<Vec<ResourceLock>> {
        Ok(self.locks.lock().unwrap().values().filter(|l| l.is_expired(now)).cloned().collect())
    }
}

fn bench_acquire_release_cycle(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    c.bench_function("acquire_then_release_single_resource", |b| {
        b.to_async(&rt).iter_batched(
            || LockManager::new(Arc::new(InMemoryLockRepository::default())),
            |manager| async move {
                let lock = manager
                    .acquire("file", "/a.txt", Uuid::new_v4(), Uuid::new_v4(), LockMode::Exclusive, None)
                    .await
                    .unwrap()
                    .unwrap();
                black_box(manager.release(lock.id).await.unwrap());
            },
            BatchSize::SmallInput,
        );
    });

    c.bench_function("acquire_all_ten_disjoint_resources", |b| {
        let requirements: Vec<(String, String, LockMode)> =
            (0..10).map(|i| (format!("file-{i}"), format!("/r{i}.txt"), LockMode::Exclusive)).collect();

        b.to_async(&rt).iter_batched(
            || LockManager::new(Arc::new(InMemoryLockRepository::default())),
            |manager| {
                let requirements = requirements.clone();
                async move {
                    black_box(manager.acquire_all(&requirements, Uuid::new_v4(), Uuid::new_v4(), None).await.unwrap())
                }
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_acquire_under_contention(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    c.bench_function("acquire_exclusive_against_held_lock", |b| {
        b.to_async(&rt).iter_batched(
            || {
                let manager = LockManager::new(Arc::new(InMemoryLockRepository::default()));
                manager
            },
            |manager| async move {
                manager
                    .acquire("file", "/contended.txt", Uuid::new_v4(), Uuid::new_v4(), LockMode::Exclusive, None)
                    .await
                    .unwrap();
                black_box(
                    manager
                        .acquire("file", "/contended.txt", Uuid::new_v4(), Uuid::new_v4(), LockMode::Exclusive, None)
                        .await
                        .unwrap(),
                )
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, bench_acquire_release_cycle, bench_acquire_under_contention);
criterion_main!(benches);
