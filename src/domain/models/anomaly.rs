//! Anomaly score domain model.
//!
//! A persisted record of one CompositeAnomalyScorer evaluation, kept so the
//! Guardian and Monitor can inspect recent history rather than only the
//! latest score.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Composite score weights (sum to 1.0).
pub const LATENCY_WEIGHT: f64 = 0.35;
pub const ERROR_RATE_WEIGHT: f64 = 0.30;
pub const RESOURCE_SKEW_WEIGHT: f64 = 0.20;
pub const QUEUE_IMPACT_WEIGHT: f64 = 0.15;

/// Score at or above which the Guardian considers an agent anomalous.
pub const ANOMALY_THRESHOLD: f64 = 0.8;

/// The four component signals that make up a composite anomaly score, each
/// already normalized to `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnomalyComponents {
    pub latency: f64,
    pub error_rate: f64,
    pub resource_skew: f64,
    pub queue_impact: f64,
}

impl AnomalyComponents {
    pub fn composite(&self) -> f64 {
        LATENCY_WEIGHT * self.latency
            + ERROR_RATE_WEIGHT * self.error_rate
            + RESOURCE_SKEW_WEIGHT * self.resource_skew
            + QUEUE_IMPACT_WEIGHT * self.queue_impact
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyScore {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub components: AnomalyComponents,
    pub composite: f64,
    pub is_anomalous: bool,
    pub evaluated_at: DateTime<Utc>,
}

impl AnomalyScore {
    pub fn new(agent_id: Uuid, components: AnomalyComponents) -> Self {
        let composite = components.composite();
        Self {
            id: Uuid::new_v4(),
            agent_id,
            components,
            composite,
            is_anomalous: composite >= ANOMALY_THRESHOLD,
            evaluated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_weights_sum_to_one() {
        assert!(
            (LATENCY_WEIGHT + ERROR_RATE_WEIGHT + RESOURCE_SKEW_WEIGHT + QUEUE_IMPACT_WEIGHT - 1.0)
                .abs()
                < 1e-9
        );
    }

    #[test]
    fn all_ones_is_anomalous() {
        let score = AnomalyScore::new(
            Uuid::new_v4(),
            AnomalyComponents {
                latency: 1.0,
                error_rate: 1.0,
                resource_skew: 1.0,
                queue_impact: 1.0,
            },
        );
        assert_eq!(score.composite, 1.0);
        assert!(score.is_anomalous);
    }

    #[test]
    fn all_zeros_is_not_anomalous() {
        let score = AnomalyScore::new(
            Uuid::new_v4(),
            AnomalyComponents {
                latency: 0.0,
                error_rate: 0.0,
                resource_skew: 0.0,
                queue_impact: 0.0,
            },
        );
        assert_eq!(score.composite, 0.0);
        assert!(!score.is_anomalous);
    }

    #[test]
    fn below_threshold_composite_is_not_anomalous() {
        let score = AnomalyScore::new(
            Uuid::new_v4(),
            AnomalyComponents {
                latency: 0.5,
                error_rate: 0.5,
                resource_skew: 0.5,
                queue_impact: 0.5,
            },
        );
        assert!((score.composite - 0.5).abs() < 1e-9);
        assert!(!score.is_anomalous);
    }
}
