//! S4 — Starvation floor: a long-aged low-priority task is boosted above a
//! fresh high-priority one rather than waiting indefinitely behind it.

mod common;

use chrono::{Duration, Utc};

use omoios_core::domain::models::{Agent, Priority, Task, TaskStatus};
use omoios_core::domain::ports::TaskRepository;

#[tokio::test]
async fn a_starving_low_priority_task_outscores_a_fresh_high_priority_one() {
    let stack = common::build_stack().await;
    let ticket_id = common::seed_ticket(&stack, "T").await;

    let mut starving = Task::new(ticket_id, "x", "starving").with_priority(Priority::Low);
    starving.created_at = Utc::now() - Duration::seconds(7201);
    stack.task_repo.insert(&starving, &[]).await.unwrap();

    let fresh = Task::new(ticket_id, "x", "fresh").with_priority(Priority::High);
    stack.task_repo.insert(&fresh, &[]).await.unwrap();

    let now = Utc::now();
    let starving_score = stack.priority_scorer.score(&starving, now).await.unwrap();
    let fresh_score = stack.priority_scorer.score(&fresh, now).await.unwrap();

    assert!((starving_score - 0.6).abs() < 1e-6);
    assert!((fresh_score - 0.3875).abs() < 1e-6);
    assert!(starving_score > fresh_score);

    let agent = Agent::new("x");
    stack.agent_repo.insert(&agent).await.unwrap();

    let assigned = stack.orchestrator.tick().await.unwrap();
    assert_eq!(assigned, 1);

    let reloaded_starving = stack.task_repo.get(starving.id).await.unwrap().unwrap();
    let reloaded_fresh = stack.task_repo.get(fresh.id).await.unwrap().unwrap();
    assert_eq!(reloaded_starving.status, TaskStatus::Running);
    assert_eq!(reloaded_fresh.status, TaskStatus::Pending);
}
