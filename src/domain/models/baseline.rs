//! Agent baseline domain model.
//!
//! The BaselineLearner maintains one [`AgentBaseline`] per (agent_type,
//! phase_id), updated by exponential moving average as new
//! [`super::agent::HealthMetrics`] observations arrive, and decayed on
//! resurrection so a restarted agent is not instantly judged against its
//! pre-restart behavior.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Smoothing factor applied to each EMA update (observed weight).
pub const LEARNING_RATE: f64 = 0.1;
/// Multiplicative factor applied to every numeric field on `decay()`.
pub const DECAY_FACTOR: f64 = 0.9;

/// Key identifying which baseline a health-metric observation belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BaselineKey {
    pub agent_type: String,
    pub phase_id: Option<String>,
}

impl BaselineKey {
    pub fn new(agent_type: impl Into<String>, phase_id: Option<String>) -> Self {
        Self {
            agent_type: agent_type.into(),
            phase_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentBaseline {
    pub agent_type: String,
    pub phase_id: Option<String>,
    pub latency_ms: f64,
    pub latency_std: f64,
    pub error_rate: f64,
    pub cpu_usage_percent: f64,
    pub memory_usage_mb: f64,
    pub additional_metrics: HashMap<String, f64>,
    pub sample_count: u64,
    pub last_updated: DateTime<Utc>,
}

impl AgentBaseline {
    pub fn new(agent_type: impl Into<String>, phase_id: Option<String>) -> Self {
        Self {
            agent_type: agent_type.into(),
            phase_id,
            latency_ms: 0.0,
            latency_std: 0.0,
            error_rate: 0.0,
            cpu_usage_percent: 0.0,
            memory_usage_mb: 0.0,
            additional_metrics: HashMap::new(),
            sample_count: 0,
            last_updated: Utc::now(),
        }
    }

    pub fn key(&self) -> BaselineKey {
        BaselineKey::new(self.agent_type.clone(), self.phase_id.clone())
    }

    fn ema(current: f64, observed: f64) -> f64 {
        LEARNING_RATE * observed + (1.0 - LEARNING_RATE) * current
    }

    /// Fold one observation into the baseline via exponential moving
    /// average, per-field including every entry in `additional_metrics`.
    /// The first observation seeds the baseline outright rather than
    /// averaging against zero.
    pub fn update(
        &mut self,
        latency_ms: f64,
        latency_std: f64,
        error_rate: f64,
        cpu_usage_percent: f64,
        memory_usage_mb: f64,
        additional_metrics: &HashMap<String, f64>,
    ) {
        if self.sample_count == 0 {
            self.latency_ms = latency_ms;
            self.latency_std = latency_std;
            self.error_rate = error_rate;
            self.cpu_usage_percent = cpu_usage_percent;
            self.memory_usage_mb = memory_usage_mb;
            self.additional_metrics = additional_metrics.clone();
        } else {
            self.latency_ms = Self::ema(self.latency_ms, latency_ms);
            self.latency_std = Self::ema(self.latency_std, latency_std);
            self.error_rate = Self::ema(self.error_rate, error_rate);
            self.cpu_usage_percent = Self::ema(self.cpu_usage_percent, cpu_usage_percent);
            self.memory_usage_mb = Self::ema(self.memory_usage_mb, memory_usage_mb);
            for (k, v) in additional_metrics {
                let current = self.additional_metrics.get(k).copied().unwrap_or(*v);
                self.additional_metrics.insert(k.clone(), Self::ema(current, *v));
            }
        }
        self.sample_count += 1;
        self.last_updated = Utc::now();
    }

    /// Multiplies every numeric field, including `additional_metrics`
    /// entries, by [`DECAY_FACTOR`]. Called by Guardian when an agent is
    /// resurrected.
    pub fn decay(&mut self) {
        self.latency_ms *= DECAY_FACTOR;
        self.latency_std *= DECAY_FACTOR;
        self.error_rate *= DECAY_FACTOR;
        self.cpu_usage_percent *= DECAY_FACTOR;
        self.memory_usage_mb *= DECAY_FACTOR;
        for v in self.additional_metrics.values_mut() {
            *v *= DECAY_FACTOR;
        }
        self.last_updated = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_observation_seeds_baseline_exactly() {
        let mut b = AgentBaseline::new("worker", Some("implementation".to_string()));
        b.update(100.0, 10.0, 0.01, 50.0, 512.0, &HashMap::new());
        assert_eq!(b.latency_ms, 100.0);
        assert_eq!(b.sample_count, 1);
    }

    #[test]
    fn second_observation_applies_ema() {
        let mut b = AgentBaseline::new("worker", None);
        b.update(100.0, 10.0, 0.01, 50.0, 512.0, &HashMap::new());
        b.update(200.0, 10.0, 0.01, 50.0, 512.0, &HashMap::new());
        let expected = 0.1 * 200.0 + 0.9 * 100.0;
        assert!((b.latency_ms - expected).abs() < 1e-9);
    }

    #[test]
    fn decay_shrinks_all_numeric_fields_including_additional_metrics() {
        let mut b = AgentBaseline::new("worker", None);
        b.update(100.0, 10.0, 0.5, 50.0, 512.0, &HashMap::from([("custom".to_string(), 4.0)]));
        b.decay();
        assert!((b.latency_ms - 90.0).abs() < 1e-9);
        assert!((b.additional_metrics["custom"] - 3.6).abs() < 1e-9);
    }

    #[test]
    fn round_trip_ema_then_inverse_decay_approximates_prior_value() {
        let mut b = AgentBaseline::new("worker", None);
        b.update(100.0, 0.0, 0.0, 0.0, 0.0, &HashMap::new());
        let before = b.latency_ms;
        b.update(100.0, 0.0, 0.0, 0.0, 0.0, &HashMap::new());
        b.latency_ms /= DECAY_FACTOR;
        assert!((b.latency_ms - before / DECAY_FACTOR).abs() < 1e-6);
    }
}
