//! PriorityScorer service (spec §4.G).
//!
//! Computes a task's schedulability score as a weighted sum of five
//! normalized signals, then applies two modifiers. Recomputed by the
//! Orchestrator every tick for the ready set.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::domain::error::DomainResult;
use crate::domain::models::{Priority, Task};
use crate::domain::ports::TaskRepository;
use crate::infrastructure::config::SchedulerConfig;

pub struct PriorityScorer {
    config: SchedulerConfig,
    task_repo: Arc<dyn TaskRepository>,
}

impl PriorityScorer {
    pub fn new(config: SchedulerConfig, task_repo: Arc<dyn TaskRepository>) -> Self {
        Self { config, task_repo }
    }

    fn age_component(&self, age_secs: f64) -> f64 {
        (age_secs / self.config.age_ceiling_secs as f64).min(1.0)
    }

    /// 1.0 inside the SLA urgency window; decays linearly to 0 over the
    /// following hour; 0 if there is no deadline.
    fn deadline_component(&self, task: &Task, now: DateTime<Utc>) -> f64 {
        let Some(deadline) = task.deadline else {
            return 0.0;
        };
        let remaining_secs = (deadline - now).num_seconds() as f64;
        if remaining_secs <= self.config.sla_urgency_window_secs as f64 {
            return 1.0;
        }
        let decay_horizon_secs = self.config.sla_urgency_window_secs as f64 + 3600.0;
        let decayed = 1.0 - (remaining_secs - self.config.sla_urgency_window_secs as f64) / 3600.0;
        if remaining_secs >= decay_horizon_secs {
            0.0
        } else {
            decayed.clamp(0.0, 1.0)
        }
    }

    fn blockers_component(&self, direct_dependents: usize) -> f64 {
        (direct_dependents as f64 / self.config.blocker_ceiling as f64).min(1.0)
    }

    fn retry_component(task: &Task) -> f64 {
        1.0 / (1.0 + task.retry_count as f64)
    }

    fn is_in_sla_window(&self, task: &Task, now: DateTime<Utc>) -> bool {
        task.deadline
            .is_some_and(|d| (d - now).num_seconds() <= self.config.sla_urgency_window_secs)
    }

    fn is_starving(&self, age_secs: f64) -> bool {
        age_secs >= self.config.starvation_limit_secs as f64
    }

    /// Computes the weighted-sum score with SLA boost and starvation floor
    /// applied. Does not persist or mutate `task`.
    pub async fn score(&self, task: &Task, now: DateTime<Utc>) -> DomainResult<f64> {
        let age_secs = (now - task.created_at).num_seconds().max(0) as f64;
        let direct_dependents = self.task_repo.dependents_of(task.id).await?.len();

        let weighted = self.config.w_priority * task.priority.base_score()
            + self.config.w_age * self.age_component(age_secs)
            + self.config.w_deadline * self.deadline_component(task, now)
            + self.config.w_blockers * self.blockers_component(direct_dependents)
            + self.config.w_retry * Self::retry_component(task);

        let boosted = if self.is_in_sla_window(task, now) {
            (weighted * 1.25).min(1.0)
        } else {
            weighted
        };

        let floored = if self.is_starving(age_secs) { boosted.max(0.6) } else { boosted };

        Ok(floored)
    }

    /// Scores every task in the ready set, persists the updated
    /// `priority_score`, and returns them sorted desc by score, ties broken
    /// by ascending `created_at`.
    pub async fn rescore_ready_set(&self) -> DomainResult<Vec<Task>> {
        let now = Utc::now();
        let mut ready = self.task_repo.ready_set().await?;
        for task in &mut ready {
            task.priority_score = self.score(task, now).await?;
            self.task_repo.update(task).await?;
        }
        ready.sort_by(|a, b| {
            b.priority_score
                .partial_cmp(&a.priority_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        Ok(ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;
    use uuid::Uuid;

    use async_trait::async_trait;

    use crate::domain::models::TaskStatus;

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
        async fn insert(&self, task: &Task, _depends_on: &[Uuid]) -> DomainResult<()> {
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
        async fn depends_on(&self, task_id: Uuid) -> DomainResult<Vec<Uuid>> {
            Ok(self.tasks.lock().unwrap().get(&task_id).map(|t| t.depends_on.clone()).unwrap_or_default())
        }
        async fn dependents_of(&self, task_id: Uuid) -> DomainResult<Vec<Uuid>> {
            Ok(self
                .tasks
                .lock()
                .unwrap()
                .values()
                .filter(|t| t.depends_on.contains(&task_id))
                .map(|t| t.id)
                .collect())
        }
        async fn ready_set(&self) -> DomainResult<Vec<Task>> {
            Ok(self
                .tasks
                .lock()
                .unwrap()
                .values()
                .filter(|t| t.status == TaskStatus::Pending)
                .cloned()
                .collect())
        }
        async fn list_by_status(&self, status: TaskStatus) -> DomainResult<Vec<Task>> {
            Ok(self.tasks.lock().unwrap().values().filter(|t| t.status == status).cloned().collect())
        }
        async fn list_by_agent(&self, _agent_id: Uuid, _status: Option<TaskStatus>) -> DomainResult<Vec<Task>> {
            Ok(vec![])
        }
        async fn list_by_ticket(&self, _ticket_id: Uuid) -> DomainResult<Vec<Task>> {
            Ok(vec![])
        }
    }

    fn scorer() -> (PriorityScorer, Arc<InMemoryTaskRepository>) {
        let repo = Arc::new(InMemoryTaskRepository::default());
        (PriorityScorer::new(SchedulerConfig::default(), repo.clone()), repo)
    }

    #[tokio::test]
    async fn fresh_critical_task_with_no_deadline_or_blockers_scores_priority_and_retry_only() {
        let (scorer, repo) = scorer();
        let ticket_id = Uuid::new_v4();
        let task = Task::new(ticket_id, "x", "t").with_priority(Priority::Critical);
        repo.seed(task.clone());

        let score = scorer.score(&task, task.created_at).await.unwrap();
        // priority: 0.45*1.0, age: 0.20*0, deadline: 0.15*0, blockers: 0.15*0, retry: 0.05*1.0
        let expected = 0.45 + 0.05;
        assert!((score - expected).abs() < 1e-6);
    }

    #[tokio::test]
    async fn task_within_sla_window_gets_boosted_and_capped() {
        let (scorer, repo) = scorer();
        let ticket_id = Uuid::new_v4();
        let now = Utc::now();
        let task = Task::new(ticket_id, "x", "t")
            .with_priority(Priority::Critical)
            .with_deadline(now + chrono::Duration::seconds(100));
        repo.seed(task.clone());

        let score = scorer.score(&task, now).await.unwrap();
        assert!(score <= 1.0);
        assert!(score > 0.45 + 0.05);
    }

    #[tokio::test]
    async fn starving_task_is_floored_to_point_six() {
        let (scorer, repo) = scorer();
        let ticket_id = Uuid::new_v4();
        let mut task = Task::new(ticket_id, "x", "t").with_priority(Priority::Low);
        task.created_at = Utc::now() - chrono::Duration::seconds(8000);
        repo.seed(task.clone());

        let score = scorer.score(&task, Utc::now()).await.unwrap();
        assert!((score - 0.6).abs() < 1e-6);
    }

    #[tokio::test]
    async fn blockers_component_reflects_direct_dependent_count() {
        let (scorer, repo) = scorer();
        let ticket_id = Uuid::new_v4();
        let blocker = Task::new(ticket_id, "x", "blocker").with_priority(Priority::Medium);
        repo.seed(blocker.clone());
        for _ in 0..5 {
            repo.seed(Task::new(ticket_id, "x", "dependent").depending_on(vec![blocker.id]));
        }

        let score = scorer.score(&blocker, blocker.created_at).await.unwrap();
        // blockers: 0.15 * (5/10) = 0.075, priority: 0.45*0.5=0.225, retry: 0.05
        let expected = 0.225 + 0.075 + 0.05;
        assert!((score - expected).abs() < 1e-6);
    }

    #[tokio::test]
    async fn rescore_ready_set_sorts_desc_by_score_then_asc_created_at() {
        let (scorer, repo) = scorer();
        let ticket_id = Uuid::new_v4();
        let low = Task::new(ticket_id, "x", "low").with_priority(Priority::Low);
        let critical = Task::new(ticket_id, "x", "critical").with_priority(Priority::Critical);
        repo.seed(low);
        repo.seed(critical.clone());

        let ranked = scorer.rescore_ready_set().await.unwrap();
        assert_eq!(ranked[0].id, critical.id);
    }
}
