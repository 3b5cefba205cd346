//! Configuration management for the orchestration core (spec §6).
//!
//! Loaded via `figment` with the same hierarchical-merge precedence the
//! rest of the pack uses: programmatic defaults, then an `omoios.yaml`
//! file, then `OMOIOS_`-prefixed environment variables taking highest
//! priority. This replaces the "global `get_app_settings()` singleton"
//! pattern (spec §9) with an explicit value threaded into every service
//! constructor.

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid scheduler weights: w_priority+w_age+w_deadline+w_blockers+w_retry = {0}, must be ~1.0")]
    SchedulerWeightsNotNormalized(f64),
    #[error("invalid monitor sensitivity: {0}, must be positive")]
    InvalidMonitorSensitivity(f64),
    #[error("invalid anomaly composite_threshold: {0}, must be in [0, 1]")]
    InvalidAnomalyThreshold(f64),
    #[error("invalid database max_connections: {0}, must be at least 1")]
    InvalidMaxConnections(u32),
    #[error("database path cannot be empty")]
    EmptyDatabasePath,
    #[error("invalid logging level: {0}, must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    pub monitor: MonitorConfig,
    pub anomaly: AnomalyConfig,
    pub dispatcher: DispatcherConfig,
    pub guardian: GuardianConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub runtime: RuntimeConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            monitor: MonitorConfig::default(),
            anomaly: AnomalyConfig::default(),
            dispatcher: DispatcherConfig::default(),
            guardian: GuardianConfig::default(),
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            runtime: RuntimeConfig::default(),
        }
    }
}

/// PriorityScorer weights and thresholds (spec §4.G).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub age_ceiling_secs: i64,
    pub sla_urgency_window_secs: i64,
    pub starvation_limit_secs: i64,
    pub blocker_ceiling: u32,
    pub w_priority: f64,
    pub w_age: f64,
    pub w_deadline: f64,
    pub w_blockers: f64,
    pub w_retry: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            age_ceiling_secs: 3600,
            sla_urgency_window_secs: 900,
            starvation_limit_secs: 7200,
            blocker_ceiling: 10,
            w_priority: 0.45,
            w_age: 0.20,
            w_deadline: 0.15,
            w_blockers: 0.15,
            w_retry: 0.05,
        }
    }
}

/// Monitor tick cadence and rolling-window sensitivity (spec §4.F).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub tick_interval_secs: u64,
    pub sensitivity: f64,
    pub rolling_history_cap: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 30,
            sensitivity: 2.0,
            rolling_history_cap: 100,
        }
    }
}

/// CompositeAnomalyScorer threshold and quarantine trigger (spec §4.E/§4.F).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    pub composite_threshold: f64,
    pub consecutive_reading_limit: u32,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            composite_threshold: 0.8,
            consecutive_reading_limit: 3,
        }
    }
}

/// Dispatcher per-task timeout and heartbeat-miss policy (spec §4.K).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub default_task_timeout_secs: u64,
    pub heartbeat_miss_limit: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            default_task_timeout_secs: 1800,
            heartbeat_miss_limit: 3,
        }
    }
}

/// Guardian resurrection and dead-promotion policy (spec §9, Open Questions).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardianConfig {
    pub resurrection_cooldown_secs: i64,
    pub dead_promotion_window_secs: i64,
    pub dead_promotion_count: u32,
}

impl Default for GuardianConfig {
    fn default() -> Self {
        Self {
            resurrection_cooldown_secs: 300,
            dead_promotion_window_secs: 1800,
            dead_promotion_count: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "omoios.sqlite3".to_string(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// HTTP `SandboxExecutor` delivery settings (spec.md §6/§7). No retry here —
/// external delivery is best-effort by design; `rate_limit_rps` guards
/// against a misbehaving sandbox fleet being hammered by CollaborationBus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub sandbox_base_url: String,
    pub request_timeout_secs: u64,
    pub rate_limit_rps: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            sandbox_base_url: "http://localhost:7700".to_string(),
            request_timeout_secs: 30,
            rate_limit_rps: 20,
        }
    }
}

/// Configuration loader with hierarchical merging.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (`Serialized`)
    /// 2. `omoios.yaml` in the working directory, if present
    /// 3. Environment variables (`OMOIOS_` prefix, `__` nested-field separator)
    pub fn load() -> Result<Config, ConfigError> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file("omoios.yaml"))
            .merge(Env::prefixed("OMOIOS_").split("__"))
            .extract()
            .map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config, ConfigError> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        let weight_sum = config.scheduler.w_priority
            + config.scheduler.w_age
            + config.scheduler.w_deadline
            + config.scheduler.w_blockers
            + config.scheduler.w_retry;
        if (weight_sum - 1.0).abs() > 1e-6 {
            return Err(ConfigError::SchedulerWeightsNotNormalized(weight_sum));
        }

        if config.monitor.sensitivity <= 0.0 {
            return Err(ConfigError::InvalidMonitorSensitivity(config.monitor.sensitivity));
        }

        if !(0.0..=1.0).contains(&config.anomaly.composite_threshold) {
            return Err(ConfigError::InvalidAnomalyThreshold(config.anomaly.composite_threshold));
        }

        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }

        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(config.database.max_connections));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        Ok(())
    }
}
