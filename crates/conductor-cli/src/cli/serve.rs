//! `cndr serve`: run the control plane until a shutdown signal.
//!
//! The lifecycle logger subscribes before bring-up so it sees the
//! configured agents register. Agents recorded in `<data_dir>/state.json`
//! are restored after bring-up and the registry is saved back once the
//! health monitor stops.

use std::future::Future;
use std::path::PathBuf;

use anyhow::{Context, Result};
use console::style;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, info_span, warn};

use conductor_core::ControlPlane;
use conductor_core::registry::service::SNAPSHOT_KEY;
use conductor_infra::config::resolve_data_dir;
use conductor_infra::storage::FileKvStore;
use conductor_observe::span_attrs::{OP_SERVE, SPAN_SERVE};
use conductor_types::event::{Attributes, ControlEvent, TOPIC_AGENTS};

use crate::state::AppState;

/// Subscription id of the lifecycle logger.
const EVENT_LOG_SUBSCRIPTION: &str = "cndr.serve.agent-events";

pub async fn serve(
    state: &AppState,
    data_dir: Option<PathBuf>,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    let span = info_span!(SPAN_SERVE, conductor.operation = OP_SERVE);
    run_plane(&state.plane, data_dir, shutdown).instrument(span).await
}

async fn run_plane(
    plane: &ControlPlane,
    data_dir: Option<PathBuf>,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    let data_dir = data_dir.unwrap_or_else(resolve_data_dir);
    let store = FileKvStore::in_dir(&data_dir);

    let event_logger = start_event_logger(plane)?;

    // Configured agents first, so they get workers; snapshot entries with
    // the same id are skipped on restore.
    let report = match plane.bring_up() {
        Ok(report) => report,
        Err(e) => {
            stop_event_logger(plane, event_logger).await;
            return Err(e).context("bring-up failed");
        }
    };
    let restored = match plane.registry().restore_snapshot(&store).await {
        Ok(restored) => restored,
        Err(e) => {
            stop_event_logger(plane, event_logger).await;
            return Err(e)
                .with_context(|| format!("failed to restore {SNAPSHOT_KEY} from {}", store.path().display()));
        }
    };

    plane.start();
    println!(
        "  {} Control plane running: {} system(s), {} agent(s), {} restored",
        style("⚡").bold(),
        report.order.len(),
        plane.registry().len(),
        restored,
    );
    println!("  {}", style("Press Ctrl+C to stop").dim());

    shutdown.await;

    plane.shutdown().await;
    stop_event_logger(plane, event_logger).await;
    let saved = plane
        .registry()
        .save_snapshot(&store)
        .await
        .with_context(|| format!("failed to save registry to {}", store.path().display()))?;

    println!("\n  Control plane stopped ({saved} agent(s) saved).");
    Ok(())
}

/// Subscribe to agent lifecycle events and log each one. The task ends with
/// the number of events logged once the subscription is removed.
fn start_event_logger(plane: &ControlPlane) -> Result<JoinHandle<usize>> {
    let mut events = plane
        .bus()
        .subscribe_channel(EVENT_LOG_SUBSCRIPTION, TOPIC_AGENTS, Attributes::new())?;
    Ok(tokio::spawn(async move {
        let mut logged = 0;
        while let Some(message) = events.recv().await {
            match ControlEvent::from_message(&message) {
                Some(event) => {
                    info!(event = event.kind(), agent_id = event.agent_id(), "agent event");
                    logged += 1;
                }
                None => warn!(message_id = %message.id, "undecodable agent event"),
            }
        }
        logged
    }))
}

/// Remove the logger's subscription and wait for it to drain.
async fn stop_event_logger(plane: &ControlPlane, logger: JoinHandle<usize>) -> usize {
    if let Err(e) = plane.bus().unsubscribe(EVENT_LOG_SUBSCRIPTION) {
        warn!(error = %e, "event logger subscription already gone");
    }
    match logger.await {
        Ok(logged) => {
            debug!(logged, "event logger stopped");
            logged
        }
        Err(e) => {
            warn!(error = %e, "event logger task failed");
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::service::secret::SecretService;
    use conductor_core::worker::WorkerCatalog;
    use conductor_types::agent::AgentRegistration;
    use conductor_types::config::ControlPlaneConfig;

    fn plane() -> ControlPlane {
        let config = ControlPlaneConfig {
            agents: vec![
                AgentRegistration::new("a-1", "analyzer"),
                AgentRegistration::new("a-2", "analyzer"),
            ],
            ..ControlPlaneConfig::default()
        };
        let mut catalog = WorkerCatalog::new();
        catalog.register_echo("analyzer");
        ControlPlane::new(config, catalog, SecretService::new(vec![]))
    }

    #[tokio::test]
    async fn test_event_logger_sees_configured_agents_register() {
        let plane = plane();
        let logger = start_event_logger(&plane).unwrap();

        plane.bring_up().unwrap();

        assert_eq!(stop_event_logger(&plane, logger).await, 2);
        assert!(plane.bus().unsubscribe(EVENT_LOG_SUBSCRIPTION).is_err());
    }

    #[tokio::test]
    async fn test_serve_logs_bring_up_and_saves_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let plane = plane();

        run_plane(&plane, Some(dir.path().to_path_buf()), async {}).await.unwrap();

        assert_eq!(plane.registry().len(), 2);
        assert!(dir.path().join("state.json").exists());
        // The subscription is released on the way out.
        assert!(plane.bus().unsubscribe(EVENT_LOG_SUBSCRIPTION).is_err());
    }
}
