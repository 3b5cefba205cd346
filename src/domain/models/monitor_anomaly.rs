//! MonitorAnomaly domain model.
//!
//! Append-only record of a rolling-window statistical anomaly detected by
//! the Monitor over a metric's history (queue depth, heartbeat age, task
//! latency, ...). Distinct from [`super::anomaly::AnomalyScore`], which is
//! the per-agent composite score; a `MonitorAnomaly` is about one named
//! metric's own history.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyType {
    Spike,
    Drop,
}

impl AnomalyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Spike => "spike",
            Self::Drop => "drop",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "spike" => Some(Self::Spike),
            "drop" => Some(Self::Drop),
            _ => None,
        }
    }

    pub fn classify(deviation: f64) -> Self {
        if deviation >= 0.0 {
            Self::Spike
        } else {
            Self::Drop
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "info" => Some(Self::Info),
            "warning" => Some(Self::Warning),
            "error" => Some(Self::Error),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }

    /// Severity from the number of standard deviations a rolling-stats
    /// observation lies from the mean: `>3σ` critical, `>2.5σ` error,
    /// `>2σ` warning, else info.
    pub fn from_deviation_sigmas(sigmas: f64) -> Self {
        let abs = sigmas.abs();
        if abs > 3.0 {
            Self::Critical
        } else if abs > 2.5 {
            Self::Error
        } else if abs > 2.0 {
            Self::Warning
        } else {
            Self::Info
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorAnomaly {
    pub id: Uuid,
    pub metric_name: String,
    pub anomaly_type: AnomalyType,
    pub severity: Severity,
    pub baseline_value: f64,
    pub observed_value: f64,
    pub deviation_percent: f64,
    pub labels: HashMap<String, String>,
    pub detected_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
}

impl MonitorAnomaly {
    pub fn new(
        metric_name: impl Into<String>,
        baseline_value: f64,
        observed_value: f64,
        sigmas: f64,
        labels: HashMap<String, String>,
    ) -> Self {
        let deviation_percent = if baseline_value.abs() > f64::EPSILON {
            (observed_value - baseline_value) / baseline_value * 100.0
        } else {
            0.0
        };
        Self {
            id: Uuid::new_v4(),
            metric_name: metric_name.into(),
            anomaly_type: AnomalyType::classify(observed_value - baseline_value),
            severity: Severity::from_deviation_sigmas(sigmas),
            baseline_value,
            observed_value,
            deviation_percent,
            labels,
            detected_at: Utc::now(),
            acknowledged_at: None,
        }
    }

    pub fn acknowledge(&mut self) {
        self.acknowledged_at = Some(Utc::now());
    }
}
