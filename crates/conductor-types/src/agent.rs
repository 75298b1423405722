//! Agent domain types: registration input, runtime state, and liveness tracking.
//!
//! An `Agent` is owned exclusively by the registry. After creation only its
//! `status` and `last_heartbeat` change; everything else is fixed for the
//! lifetime of one registration.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::policy::Permission;

/// Lifecycle status of a registered agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Registering,
    Active,
    Idle,
    Busy,
    Unhealthy,
    Offline,
}

impl AgentStatus {
    /// Whether moving from `self` to `next` is a legal lifecycle transition.
    ///
    /// Self-transitions are not transitions and return `false`; callers treat
    /// them as no-ops.
    pub fn can_transition_to(self, next: AgentStatus) -> bool {
        use AgentStatus::*;

        match (self, next) {
            (Offline, _) => false,
            (_, Offline) => true,
            (Registering, Active) => true,
            (Active | Idle | Busy, Active | Idle | Busy) => self != next,
            (Active | Idle | Busy, Unhealthy) => true,
            // Recovery: a fresh heartbeat brings a stale agent back.
            (Unhealthy, Active) => true,
            _ => false,
        }
    }

    /// OFFLINE is terminal for a registration instance.
    pub fn is_terminal(self) -> bool {
        self == AgentStatus::Offline
    }

    /// Whether requests may be routed to an agent in this status.
    pub fn is_routable(self) -> bool {
        matches!(
            self,
            AgentStatus::Active | AgentStatus::Idle | AgentStatus::Busy
        )
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentStatus::Registering => "registering",
            AgentStatus::Active => "active",
            AgentStatus::Idle => "idle",
            AgentStatus::Busy => "busy",
            AgentStatus::Unhealthy => "unhealthy",
            AgentStatus::Offline => "offline",
        };
        write!(f, "{s}")
    }
}

impl FromStr for AgentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "registering" => Ok(AgentStatus::Registering),
            "active" => Ok(AgentStatus::Active),
            "idle" => Ok(AgentStatus::Idle),
            "busy" => Ok(AgentStatus::Busy),
            "unhealthy" => Ok(AgentStatus::Unhealthy),
            "offline" => Ok(AgentStatus::Offline),
            other => Err(format!("invalid agent status: '{other}'")),
        }
    }
}

/// Input to `AgentRegistry::register`.
///
/// Also the shape of an `[[agents]]` entry in the control-plane config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRegistration {
    pub id: String,
    pub agent_type: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<Permission>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub endpoint: String,
}

impl AgentRegistration {
    pub fn new(id: impl Into<String>, agent_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            agent_type: agent_type.into(),
            roles: Vec::new(),
            permissions: Vec::new(),
            capabilities: Vec::new(),
            endpoint: String::new(),
        }
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_permissions(mut self, permissions: impl IntoIterator<Item = Permission>) -> Self {
        self.permissions = permissions.into_iter().collect();
        self
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

/// A registered worker agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub agent_type: String,
    pub status: AgentStatus,
    pub roles: Vec<String>,
    pub permissions: Vec<Permission>,
    pub capabilities: Vec<String>,
    pub endpoint: String,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
}

impl Agent {
    /// Build an agent from a registration at time `now`.
    pub fn from_registration(registration: AgentRegistration, status: AgentStatus, now: DateTime<Utc>) -> Self {
        Self {
            id: registration.id,
            agent_type: registration.agent_type,
            status,
            roles: registration.roles,
            permissions: registration.permissions,
            capabilities: registration.capabilities,
            endpoint: registration.endpoint,
            registered_at: now,
            last_heartbeat: now,
        }
    }
}

/// Liveness record for one agent, created lazily on first heartbeat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub agent_id: String,
    pub status: AgentStatus,
    pub last_heartbeat: DateTime<Utc>,
    /// Reported by the agent via the `response_time_ms` heartbeat metadata key.
    pub response_time_ms: Option<u64>,
    /// Number of sweeps that found the agent stale.
    pub error_count: u32,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl HealthCheck {
    pub fn new(agent_id: impl Into<String>, status: AgentStatus, now: DateTime<Utc>) -> Self {
        Self {
            agent_id: agent_id.into(),
            status,
            last_heartbeat: now,
            response_time_ms: None,
            error_count: 0,
            metadata: serde_json::Map::new(),
        }
    }
}
