//! Domain layer: entities, value objects, and repository contracts.
//!
//! Nothing in this module performs I/O. Persistence, the event bus, and the
//! external agent/sandbox runtimes are all reached through `ports`.

pub mod error;
pub mod models;
pub mod ports;

pub use error::{DomainError, DomainResult};
