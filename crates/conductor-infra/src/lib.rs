//! Infrastructure layer for Conductor.
//!
//! Contains implementations of the port traits defined in `conductor-core`:
//! in-memory and file-backed key-value stores, environment and in-memory
//! secret providers, and configuration loading from the platform config
//! directory.

pub mod config;
pub mod secret;
pub mod storage;
