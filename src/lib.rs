//! OmoiOS task orchestration core: task queue and priority scoring,
//! resource lock management, agent health/anomaly scoring, and the
//! inter-agent collaboration bus.
//!
//! Layered the way `abathur` lays out its workspace: `domain` (models and
//! outbound ports, no I/O) is depended on by `services` (the orchestration
//! logic, generic over the ports), which `adapters` (SQLite persistence,
//! HTTP/mock agent runtime) implement. `infrastructure` (config, logging) is
//! wired together by the binary in `main.rs`.

pub mod adapters;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use domain::{DomainError, DomainResult};
pub use infrastructure::{Config, ConfigError, ConfigLoader};
