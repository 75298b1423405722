//! Agent registry and its background health monitor.

pub mod health;
pub mod service;

pub use health::HealthMonitor;
pub use service::AgentRegistry;
