//! BaselineLearner service (spec §4.D).
//!
//! Maintains one baseline row per `(agent_type, phase_id)`, folding new
//! observations in by EMA and decaying on resurrection so a restarted agent
//! isn't immediately judged against stale pre-restart behavior.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::domain::error::DomainResult;
use crate::domain::models::{AgentBaseline, BaselineKey};
use crate::domain::ports::BaselineRepository;

pub struct BaselineLearner {
    repo: Arc<dyn BaselineRepository>,
}

impl BaselineLearner {
    pub fn new(repo: Arc<dyn BaselineRepository>) -> Self {
        Self { repo }
    }

    /// Folds one set of observed health metrics into the baseline for
    /// `(agent_type, phase_id)`, creating it with `sample_count=1` if this
    /// is the first observation.
    #[allow(clippy::too_many_arguments)]
    pub async fn learn(
        &self,
        agent_type: &str,
        phase_id: Option<String>,
        latency_ms: f64,
        latency_std: f64,
        error_rate: f64,
        cpu_usage_percent: f64,
        memory_usage_mb: f64,
        additional_metrics: &HashMap<String, f64>,
    ) -> DomainResult<AgentBaseline> {
        let key = BaselineKey::new(agent_type, phase_id.clone());
        let mut baseline = self
            .repo
            .get(&key)
            .await?
            .unwrap_or_else(|| AgentBaseline::new(agent_type, phase_id));

        baseline.update(
            latency_ms,
            latency_std,
            error_rate,
            cpu_usage_percent,
            memory_usage_mb,
            additional_metrics,
        );
        self.repo.upsert(&baseline).await?;
        debug!(agent_type, sample_count = baseline.sample_count, "baseline updated");
        Ok(baseline)
    }

    /// Relaxes the baseline for `(agent_type, phase_id)` towards zero.
    /// Called by Guardian when an agent is resurrected. No-op if no
    /// baseline exists yet.
    pub async fn decay(&self, agent_type: &str, phase_id: Option<String>) -> DomainResult<()> {
        let key = BaselineKey::new(agent_type, phase_id);
        if let Some(mut baseline) = self.repo.get(&key).await? {
            baseline.decay();
            self.repo.upsert(&baseline).await?;
        }
        Ok(())
    }

    pub async fn get(&self, key: &BaselineKey) -> DomainResult<Option<AgentBaseline>> {
        self.repo.get(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;

    #[derive(Default)]
    struct InMemoryBaselineRepository {
        rows: StdMutex<HashMap<BaselineKey, AgentBaseline>>,
    }

    #[async_trait]
    impl BaselineRepository for InMemoryBaselineRepository {
        async fn get(&self, key: &BaselineKey) -> DomainResult<Option<AgentBaseline>> {
            Ok(self.rows.lock().unwrap().get(key).cloned())
        }

        async fn upsert(&self, baseline: &AgentBaseline) -> DomainResult<()> {
            self.rows.lock().unwrap().insert(baseline.key(), baseline.clone());
            Ok(())
        }

        async fn list(&self) -> DomainResult<Vec<AgentBaseline>> {
            Ok(self.rows.lock().unwrap().values().cloned().collect())
        }
    }

    #[tokio::test]
    async fn first_observation_creates_baseline_with_sample_count_one() {
        let learner = BaselineLearner::new(Arc::new(InMemoryBaselineRepository::default()));
        let baseline = learner
            .learn("worker", Some("implementation".to_string()), 100.0, 10.0, 0.0, 50.0, 512.0, &HashMap::new())
            .await
            .unwrap();
        assert_eq!(baseline.sample_count, 1);
        assert_eq!(baseline.latency_ms, 100.0);
    }

    #[tokio::test]
    async fn second_observation_applies_ema_not_overwrite() {
        let learner = BaselineLearner::new(Arc::new(InMemoryBaselineRepository::default()));
        learner.learn("worker", None, 100.0, 10.0, 0.0, 50.0, 512.0, &HashMap::new()).await.unwrap();
        let baseline = learner.learn("worker", None, 200.0, 10.0, 0.0, 50.0, 512.0, &HashMap::new()).await.unwrap();
        assert!((baseline.latency_ms - 110.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn decay_without_existing_baseline_is_a_no_op() {
        let learner = BaselineLearner::new(Arc::new(InMemoryBaselineRepository::default()));
        assert!(learner.decay("worker", None).await.is_ok());
    }

    #[tokio::test]
    async fn decay_shrinks_learned_baseline() {
        let learner = BaselineLearner::new(Arc::new(InMemoryBaselineRepository::default()));
        learner.learn("worker", None, 100.0, 0.0, 0.0, 0.0, 0.0, &HashMap::new()).await.unwrap();
        learner.decay("worker", None).await.unwrap();
        let key = BaselineKey::new("worker", None);
        let baseline = learner.get(&key).await.unwrap().unwrap();
        assert!((baseline.latency_ms - 90.0).abs() < 1e-9);
    }
}
