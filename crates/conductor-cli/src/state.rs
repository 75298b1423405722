//! Wires the control plane from configuration for CLI commands.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use conductor_core::ControlPlane;
use conductor_core::worker::WorkerCatalog;
use conductor_infra::config::load_config_or_default;
use conductor_infra::secret::chain::default_secret_service;
use conductor_types::config::ControlPlaneConfig;

/// Shared state handed to every command.
#[derive(Clone)]
pub struct AppState {
    pub plane: Arc<ControlPlane>,
}

impl AppState {
    /// Load the config and build the control plane. Nothing is brought up yet.
    pub async fn init(config_path: Option<&Path>) -> Result<Self> {
        let config = load_config_or_default(config_path)
            .await
            .context("failed to load control-plane config")?;
        let catalog = echo_catalog(&config);
        let plane = ControlPlane::new(config, catalog, default_secret_service(true));
        Ok(Self {
            plane: Arc::new(plane),
        })
    }
}

/// A catalog that binds an echo worker for every agent type the config
/// declares. Operators get a runnable plane before real workers exist.
fn echo_catalog(config: &ControlPlaneConfig) -> WorkerCatalog {
    let mut catalog = WorkerCatalog::new();
    for agent in &config.agents {
        if !catalog.contains(&agent.agent_type) {
            catalog.register_echo(agent.agent_type.clone());
        }
    }
    catalog
}
