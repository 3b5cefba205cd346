//! HTTP-backed `SandboxExecutor` (spec §6): delivers a best-effort
//! out-of-band message to a running sandbox's message-injection endpoint.
//! No retry here per spec §7 — a failed delivery is recorded as
//! undeliverable, not retried.

use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::Serialize;

use crate::domain::models::Task;
use crate::domain::ports::{AgentRuntime, ConversationHandle, SandboxDeliveryError, SandboxExecutor};
use crate::infrastructure::config::RuntimeConfig;

type DirectRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

#[derive(Serialize)]
struct InjectMessageRequest<'a> {
    text: &'a str,
}

pub struct HttpSandboxExecutor {
    client: Client,
    base_url: String,
    limiter: DirectRateLimiter,
}

impl HttpSandboxExecutor {
    pub fn new(config: &RuntimeConfig) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(config.request_timeout_secs)).build()?;
        let quota = Quota::per_second(NonZeroU32::new(config.rate_limit_rps.max(1)).unwrap());
        Ok(Self {
            client,
            base_url: config.sandbox_base_url.clone(),
            limiter: RateLimiter::direct(quota),
        })
    }
}

#[async_trait]
impl SandboxExecutor for HttpSandboxExecutor {
    async fn inject_message(&self, sandbox_id: &str, text: &str) -> Result<(), SandboxDeliveryError> {
        self.limiter.until_ready().await;

        let url = format!("{}/sandboxes/{sandbox_id}/messages", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&InjectMessageRequest { text })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SandboxDeliveryError::Timeout(30)
                } else {
                    SandboxDeliveryError::Unreachable(sandbox_id.to_string(), e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SandboxDeliveryError::Rejected(body));
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct StartRunRequest<'a> {
    task_id: String,
    agent_id: String,
    task_type: &'a str,
    title: &'a str,
}

#[derive(serde::Deserialize)]
struct StartRunResponse {
    conversation_id: String,
}

/// HTTP-backed `AgentRuntime`: the core's only outbound calls to whatever
/// system actually provisions sandboxes and drives the agent loop. Opaque
/// by design (spec §6) — this adapter only has to speak the three verbs
/// the trait names.
pub struct HttpAgentRuntime {
    client: Client,
    base_url: String,
}

impl HttpAgentRuntime {
    pub fn new(config: &RuntimeConfig) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(config.request_timeout_secs)).build()?;
        Ok(Self {
            client,
            base_url: config.sandbox_base_url.clone(),
        })
    }
}

#[async_trait]
impl AgentRuntime for HttpAgentRuntime {
    async fn start(&self, task: &Task, agent_id: uuid::Uuid) -> anyhow::Result<ConversationHandle> {
        let response = self
            .client
            .post(format!("{}/runs", self.base_url))
            .json(&StartRunRequest {
                task_id: task.id.to_string(),
                agent_id: agent_id.to_string(),
                task_type: &task.task_type,
                title: &task.title,
            })
            .send()
            .await?
            .error_for_status()?
            .json::<StartRunResponse>()
            .await?;
        Ok(ConversationHandle(response.conversation_id))
    }

    async fn inject_message(&self, handle: &ConversationHandle, text: &str) -> anyhow::Result<bool> {
        let response = self
            .client
            .post(format!("{}/runs/{}/messages", self.base_url, handle.0))
            .json(&InjectMessageRequest { text })
            .send()
            .await?;
        Ok(response.status().is_success())
    }

    async fn cancel(&self, handle: &ConversationHandle) -> anyhow::Result<bool> {
        let response = self.client.post(format!("{}/runs/{}/cancel", self.base_url, handle.0)).send().await?;
        Ok(response.status().is_success())
    }
}
