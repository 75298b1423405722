//! Event bus domain types.
//!
//! `Message` is the immutable envelope stored in a topic log and handed to
//! subscribers. `ControlEvent` is the typed set of events the control plane
//! itself announces on the bus.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::AgentStatus;

/// String attributes attached to a message and used for filtered delivery.
pub type Attributes = BTreeMap<String, String>;

/// Topic carrying agent lifecycle events.
pub const TOPIC_AGENTS: &str = "control.agents";

/// Topic carrying routing decisions.
pub const TOPIC_ROUTING: &str = "control.routing";

/// Attribute key naming the event kind on control-plane topics.
pub const ATTR_EVENT: &str = "event";

/// Attribute key naming the agent an event concerns.
pub const ATTR_AGENT_ID: &str = "agent_id";

/// A published message. Immutable once published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// UUIDv7 message ID.
    pub id: Uuid,
    pub topic: String,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub attributes: Attributes,
    pub published_at: DateTime<Utc>,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: serde_json::Value, attributes: Attributes) -> Self {
        Self {
            id: Uuid::now_v7(),
            topic: topic.into(),
            payload,
            attributes,
            published_at: Utc::now(),
        }
    }

    /// Subset match: every filter entry must be present with an equal value.
    ///
    /// An empty filter matches every message.
    pub fn matches(&self, filter: &Attributes) -> bool {
        filter
            .iter()
            .all(|(key, value)| self.attributes.get(key) == Some(value))
    }
}

/// Metadata about a subscription (the handler itself is not serializable).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionInfo {
    pub id: String,
    pub topic: String,
    pub filter: Attributes,
    pub created_at: DateTime<Utc>,
}

/// Summary of a topic for listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicInfo {
    pub name: String,
    pub message_count: usize,
    pub subscriber_count: usize,
}

/// Events announced by the control plane itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlEvent {
    AgentRegistered {
        agent_id: String,
        agent_type: String,
        roles: Vec<String>,
    },
    AgentUnregistered {
        agent_id: String,
    },
    AgentStatusChanged {
        agent_id: String,
        old_status: AgentStatus,
        new_status: AgentStatus,
    },
    RequestRouted {
        path: String,
        method: String,
        user_id: Option<String>,
        agent_id: String,
    },
}

impl ControlEvent {
    /// Event kind name, used as the `event` attribute.
    pub fn kind(&self) -> &'static str {
        match self {
            ControlEvent::AgentRegistered { .. } => "agent_registered",
            ControlEvent::AgentUnregistered { .. } => "agent_unregistered",
            ControlEvent::AgentStatusChanged { .. } => "agent_status_changed",
            ControlEvent::RequestRouted { .. } => "request_routed",
        }
    }

    /// Topic this event is published on.
    pub fn topic(&self) -> &'static str {
        match self {
            ControlEvent::RequestRouted { .. } => TOPIC_ROUTING,
            _ => TOPIC_AGENTS,
        }
    }

    pub fn agent_id(&self) -> &str {
        match self {
            ControlEvent::AgentRegistered { agent_id, .. }
            | ControlEvent::AgentUnregistered { agent_id }
            | ControlEvent::AgentStatusChanged { agent_id, .. }
            | ControlEvent::RequestRouted { agent_id, .. } => agent_id,
        }
    }

    /// Attributes subscribers can filter on: `event` and `agent_id`.
    pub fn attributes(&self) -> Attributes {
        let mut attributes = Attributes::new();
        attributes.insert(ATTR_EVENT.to_string(), self.kind().to_string());
        attributes.insert(ATTR_AGENT_ID.to_string(), self.agent_id().to_string());
        attributes
    }

    /// Decode a control event from a message payload.
    pub fn from_message(message: &Message) -> Option<Self> {
        serde_json::from_value(message.payload.clone()).ok()
    }
}
