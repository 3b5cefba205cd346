//! Adapters for the external agent/sandbox runtime (spec §6): an HTTP
//! implementation for production and an in-memory mock for tests.

pub mod http;
pub mod mock;

pub use http::{HttpAgentRuntime, HttpSandboxExecutor};
pub use mock::{MockAgentRuntime, MockSandboxExecutor};
