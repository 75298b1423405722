//! Shared domain types for the Conductor control plane.
//!
//! This crate contains the core domain types used across the workspace:
//! Agent, HealthCheck, Message, Policy, Route, SystemNode, configuration,
//! secrets, and their associated error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod agent;
pub mod config;
pub mod error;
pub mod event;
pub mod policy;
pub mod secret;
pub mod system;
