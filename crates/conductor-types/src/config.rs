//! Control-plane configuration types.
//!
//! `ControlPlaneConfig` represents the top-level `conductor.toml`: registry
//! timing, bus retention, access policies, routes, pre-registered agents and
//! the bring-up batch of declared systems. All fields have sensible defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent::AgentRegistration;
use crate::policy::{Policy, Route, UserRoles};
use crate::system::SystemNode;

/// Top-level configuration for one control-plane process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControlPlaneConfig {
    #[serde(default)]
    pub registry: RegistryConfig,

    #[serde(default)]
    pub bus: BusConfig,

    #[serde(default)]
    pub policies: Vec<Policy>,

    #[serde(default)]
    pub user_roles: Vec<UserRoles>,

    #[serde(default)]
    pub routes: Vec<Route>,

    /// Agents registered when the control plane starts.
    #[serde(default)]
    pub agents: Vec<AgentRegistration>,

    /// Systems resolved and merged at bring-up.
    #[serde(default)]
    pub systems: Vec<SystemNode>,
}

/// Agent registry and health-sweep timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// How often the health sweep runs.
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,

    /// An agent silent for longer than this is marked unhealthy.
    #[serde(default = "default_heartbeat_timeout_secs")]
    pub heartbeat_timeout_secs: u64,

    /// Upper bound on how long `stop` waits for the sweep loop to exit.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

fn default_health_check_interval_secs() -> u64 {
    30
}

fn default_heartbeat_timeout_secs() -> u64 {
    60
}

fn default_shutdown_timeout_secs() -> u64 {
    5
}

impl RegistryConfig {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs.max(1))
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            health_check_interval_secs: default_health_check_interval_secs(),
            heartbeat_timeout_secs: default_heartbeat_timeout_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

/// Event bus retention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusConfig {
    /// Per-topic log cap; oldest messages are dropped first. 0 = unbounded.
    #[serde(default = "default_max_messages_per_topic")]
    pub max_messages_per_topic: usize,
}

fn default_max_messages_per_topic() -> usize {
    10_000
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_messages_per_topic: default_max_messages_per_topic(),
        }
    }
}
