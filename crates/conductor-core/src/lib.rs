//! Control-plane behaviour and port trait definitions for Conductor.
//!
//! This crate defines the event bus, agent registry, policy router and
//! bring-up resolver, plus the "ports" (storage and secret traits) that the
//! infrastructure layer implements. It depends only on `conductor-types`,
//! never on `conductor-infra` or any I/O crate.

pub mod bringup;
pub mod control_plane;
pub mod event;
pub mod registry;
pub mod repository;
pub mod router;
pub mod service;
pub mod storage;
pub mod worker;

pub use control_plane::{ControlPlane, DispatchError};
