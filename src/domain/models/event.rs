//! Domain event model published on the EventBus and persisted as the
//! append-only audit trail.
//!
//! `Event` mirrors the source's `event_type / entity_type / entity_id /
//! payload` shape rather than a typed enum-per-variant, because the EventBus
//! matches subscribers by `event_type` string prefix (e.g. `"agent."`)
//! which a closed Rust enum can't express as cheaply.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// The event type vocabulary published on the bus and persisted as `Event`
/// rows. Kept as an enum for compile-time typo safety at call sites; its
/// `Display` is the dotted string form subscribers filter on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    TaskAssigned,
    TaskCompleted,
    TaskFailed,
    TicketCreated,
    TicketUpdated,
    AgentRegistered,
    AgentQuarantined,
    AgentResurrected,
    AgentDead,
    AgentMessageSent,
    AgentHandoffRequested,
    AgentHandoffAccepted,
    AgentHandoffDeclined,
    LockAcquired,
    LockReleased,
    LockExpired,
    MonitorAnomalyDetected,
    MonitorAgentAnomaly,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskAssigned => "TASK_ASSIGNED",
            Self::TaskCompleted => "TASK_COMPLETED",
            Self::TaskFailed => "TASK_FAILED",
            Self::TicketCreated => "TICKET_CREATED",
            Self::TicketUpdated => "TICKET_UPDATED",
            Self::AgentRegistered => "agent.registered",
            Self::AgentQuarantined => "agent.quarantined",
            Self::AgentResurrected => "agent.resurrected",
            Self::AgentDead => "agent.dead",
            Self::AgentMessageSent => "agent.message.sent",
            Self::AgentHandoffRequested => "agent.handoff.requested",
            Self::AgentHandoffAccepted => "agent.handoff.accepted",
            Self::AgentHandoffDeclined => "agent.handoff.declined",
            Self::LockAcquired => "lock.acquired",
            Self::LockReleased => "lock.released",
            Self::LockExpired => "lock.expired",
            Self::MonitorAnomalyDetected => "monitor.anomaly.detected",
            Self::MonitorAgentAnomaly => "monitor.agent.anomaly",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "TASK_ASSIGNED" => Self::TaskAssigned,
            "TASK_COMPLETED" => Self::TaskCompleted,
            "TASK_FAILED" => Self::TaskFailed,
            "TICKET_CREATED" => Self::TicketCreated,
            "TICKET_UPDATED" => Self::TicketUpdated,
            "agent.registered" => Self::AgentRegistered,
            "agent.quarantined" => Self::AgentQuarantined,
            "agent.resurrected" => Self::AgentResurrected,
            "agent.dead" => Self::AgentDead,
            "agent.message.sent" => Self::AgentMessageSent,
            "agent.handoff.requested" => Self::AgentHandoffRequested,
            "agent.handoff.accepted" => Self::AgentHandoffAccepted,
            "agent.handoff.declined" => Self::AgentHandoffDeclined,
            "lock.acquired" => Self::LockAcquired,
            "lock.released" => Self::LockReleased,
            "lock.expired" => Self::LockExpired,
            "monitor.anomaly.detected" => Self::MonitorAnomalyDetected,
            "monitor.agent.anomaly" => Self::MonitorAgentAnomaly,
            _ => return None,
        })
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An append-only audit record of a domain state change. `entity_type` is a
/// lowercase singular noun (`"task"`, `"agent"`, `"lock"`, ...); `payload`
/// carries whatever fields are relevant to `event_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub event_type: EventType,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(
        event_type: EventType,
        entity_type: impl Into<String>,
        entity_id: Uuid,
        payload: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            entity_type: entity_type.into(),
            entity_id,
            payload,
            timestamp: Utc::now(),
        }
    }

    /// True if `event_type`'s dotted form starts with `prefix`, the
    /// matching rule EventBus subscribers register against.
    pub fn matches_prefix(&self, prefix: &str) -> bool {
        self.event_type.as_str().starts_with(prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_event_stamps_timestamp() {
        let e = Event::new(EventType::LockReleased, "lock", Uuid::new_v4(), json!({}));
        assert!(e.timestamp <= Utc::now());
    }

    #[test]
    fn event_type_round_trips_through_str() {
        for t in [
            EventType::TaskAssigned,
            EventType::AgentQuarantined,
            EventType::LockExpired,
            EventType::MonitorAgentAnomaly,
        ] {
            assert_eq!(EventType::from_str(t.as_str()), Some(t));
        }
    }

    #[test]
    fn prefix_match_is_used_for_subscriber_filtering() {
        let e = Event::new(EventType::AgentQuarantined, "agent", Uuid::new_v4(), json!({}));
        assert!(e.matches_prefix("agent."));
        assert!(!e.matches_prefix("lock."));
    }
}
