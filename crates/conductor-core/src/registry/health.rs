//! Background health sweep for the agent registry.
//!
//! One interval loop per registry, cancelled through a `CancellationToken`.
//! `start` and `stop` are idempotent; `stop` waits for the loop to exit,
//! bounded by the shutdown timeout, and aborts it if the bound is exceeded.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use conductor_types::config::RegistryConfig;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::service::AgentRegistry;

/// Source of "now" for sweeps.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Periodic staleness sweep over an [`AgentRegistry`].
pub struct HealthMonitor {
    registry: Arc<AgentRegistry>,
    interval: Duration,
    shutdown_timeout: Duration,
    clock: Clock,
    running: Mutex<Option<Running>>,
}

impl HealthMonitor {
    pub fn new(registry: Arc<AgentRegistry>, interval: Duration, shutdown_timeout: Duration) -> Self {
        Self {
            registry,
            interval,
            shutdown_timeout,
            clock: Arc::new(Utc::now),
            running: Mutex::new(None),
        }
    }

    pub fn from_config(registry: Arc<AgentRegistry>, config: &RegistryConfig) -> Self {
        Self::new(registry, config.health_check_interval(), config.shutdown_timeout())
    }

    /// Replace the wall clock used to timestamp sweeps.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Spawn the sweep loop on the current tokio runtime.
    ///
    /// Returns `false` if the loop was already running.
    pub fn start(&self) -> bool {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running.is_some() {
            return false;
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(sweep_loop(
            Arc::clone(&self.registry),
            self.interval,
            Arc::clone(&self.clock),
            cancel.clone(),
        ));
        *running = Some(Running { cancel, task });

        info!(interval_secs = self.interval.as_secs(), "health monitor started");
        true
    }

    /// Cancel the sweep loop and wait for it to exit.
    ///
    /// Returns `false` if the loop was not running.
    pub async fn stop(&self) -> bool {
        let Some(Running { cancel, mut task }) = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return false;
        };

        cancel.cancel();
        match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
            Ok(Ok(())) => info!("health monitor stopped"),
            Ok(Err(e)) => warn!(error = %e, "health monitor task failed"),
            Err(_) => {
                warn!(
                    timeout_secs = self.shutdown_timeout.as_secs(),
                    "health monitor did not stop in time, aborting"
                );
                task.abort();
            }
        }
        true
    }
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("interval", &self.interval)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("running", &self.is_running())
            .finish()
    }
}

async fn sweep_loop(
    registry: Arc<AgentRegistry>,
    period: Duration,
    clock: Clock,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; sweeps start one period in.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("health sweep loop cancelled");
                break;
            }
            _ = ticker.tick() => {
                let demoted = registry.sweep(clock());
                if !demoted.is_empty() {
                    info!(count = demoted.len(), "health sweep demoted stale agents");
                }
            }
        }
    }
}
