//! Infrastructure: configuration loading and logging setup. Everything
//! here is I/O adjacent but not itself domain logic.

pub mod config;
pub mod logging;

pub use config::{Config, ConfigError, ConfigLoader};
