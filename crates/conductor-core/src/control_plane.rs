//! The control-plane service object.
//!
//! Built once at process start and passed by reference to whatever needs
//! the bus, registry or router. Holds no global state.

use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};

use conductor_types::agent::{Agent, AgentRegistration};
use conductor_types::config::ControlPlaneConfig;
use conductor_types::error::ControlPlaneError;
use conductor_types::policy::RouteRequest;
use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::bringup::{BringUpReport, Namespace, bring_up};
use crate::event::EventBus;
use crate::registry::{AgentRegistry, HealthMonitor};
use crate::router::{PolicyEngine, PolicyRouter};
use crate::service::secret::SecretService;
use crate::worker::{BoxWorkerAgent, WorkerCatalog, WorkerError, WorkerTask};

/// Failure to carry a routed request through to a worker.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Route(#[from] ControlPlaneError),

    #[error("no worker bound to agent '{0}'")]
    NoWorker(String),

    #[error("worker '{agent_id}' failed: {source}")]
    Worker {
        agent_id: String,
        #[source]
        source: WorkerError,
    },
}

pub struct ControlPlane {
    config: ControlPlaneConfig,
    bus: Arc<EventBus>,
    registry: Arc<AgentRegistry>,
    monitor: HealthMonitor,
    router: PolicyRouter,
    secrets: Arc<SecretService>,
    catalog: WorkerCatalog,
    workers: DashMap<String, Arc<BoxWorkerAgent>>,
    namespace: RwLock<Option<Namespace>>,
}

impl ControlPlane {
    /// Wire the bus, registry, monitor and router from configuration.
    ///
    /// Configured routes, policies and role assignments are installed here;
    /// configured agents and systems are brought up by [`bring_up`](Self::bring_up).
    pub fn new(config: ControlPlaneConfig, catalog: WorkerCatalog, secrets: SecretService) -> Self {
        let bus = Arc::new(EventBus::from_config(&config.bus));
        let registry = Arc::new(AgentRegistry::from_config(Arc::clone(&bus), &config.registry));
        let monitor = HealthMonitor::from_config(Arc::clone(&registry), &config.registry);

        let engine = PolicyEngine::with_config(&config.policies, &config.user_roles);
        let router = PolicyRouter::new(engine, Arc::clone(&registry), Arc::clone(&bus));
        for route in &config.routes {
            router.register_route(route.clone());
        }

        Self {
            config,
            bus,
            registry,
            monitor,
            router,
            secrets: Arc::new(secrets),
            catalog,
            workers: DashMap::new(),
            namespace: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &ControlPlaneConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn router(&self) -> &PolicyRouter {
        &self.router
    }

    pub fn monitor(&self) -> &HealthMonitor {
        &self.monitor
    }

    pub fn secrets(&self) -> &Arc<SecretService> {
        &self.secrets
    }

    pub fn catalog(&self) -> &WorkerCatalog {
        &self.catalog
    }

    /// Namespace produced by the last successful bring-up.
    pub fn namespace(&self) -> Option<Namespace> {
        self.namespace
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Resolve and merge the configured systems, then register the
    /// configured agents.
    ///
    /// All or nothing: if the systems do not resolve, or a configured agent
    /// id is repeated or already registered, no agent is registered and the
    /// namespace is left as it was.
    pub fn bring_up(&self) -> Result<BringUpReport, ControlPlaneError> {
        self.check_configured_agent_ids()?;
        let mut systems = self.config.systems.clone();
        let report = bring_up(&mut systems)?;

        let mut registered: Vec<String> = Vec::with_capacity(self.config.agents.len());
        for registration in &self.config.agents {
            match self.register_agent(registration.clone()) {
                Ok(agent) => registered.push(agent.id),
                Err(e) => {
                    // Another caller took the id after the pre-check.
                    for id in &registered {
                        if let Err(rollback) = self.unregister_agent(id) {
                            warn!(agent_id = %id, error = %rollback, "bring-up rollback failed");
                        }
                    }
                    return Err(e);
                }
            }
        }
        *self.namespace.write().unwrap_or_else(PoisonError::into_inner) = Some(report.namespace.clone());

        info!(
            systems = report.order.len(),
            agents = self.config.agents.len(),
            "control plane brought up"
        );
        Ok(report)
    }

    fn check_configured_agent_ids(&self) -> Result<(), ControlPlaneError> {
        let mut seen = HashSet::new();
        for registration in &self.config.agents {
            let id = registration.id.as_str();
            if !seen.insert(id) || self.registry.get(id).is_some() {
                return Err(ControlPlaneError::DuplicateAgentId(id.to_string()));
            }
        }
        Ok(())
    }

    /// Register an agent and bind a worker if its type is in the catalog.
    pub fn register_agent(&self, registration: AgentRegistration) -> Result<Agent, ControlPlaneError> {
        let worker = self.catalog.build(&registration);
        let agent = self.registry.register(registration)?;

        match worker {
            Some(worker) => {
                debug!(agent_id = %agent.id, agent_type = %agent.agent_type, "worker bound");
                self.workers.insert(agent.id.clone(), Arc::new(worker));
            }
            None => warn!(
                agent_id = %agent.id,
                agent_type = %agent.agent_type,
                "no worker constructor for agent type"
            ),
        }
        Ok(agent)
    }

    pub fn unregister_agent(&self, id: &str) -> Result<Agent, ControlPlaneError> {
        let agent = self.registry.unregister(id)?;
        self.workers.remove(id);
        Ok(agent)
    }

    /// Route a request and run it on the bound worker.
    pub async fn dispatch(
        &self,
        request: &RouteRequest,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, DispatchError> {
        let decision = self.router.route(request)?;
        let worker = self
            .workers
            .get(&decision.agent_id)
            .map(|w| Arc::clone(w.value()))
            .ok_or_else(|| DispatchError::NoWorker(decision.agent_id.clone()))?;

        let task = WorkerTask {
            agent_id: decision.agent_id.clone(),
            path: decision.path,
            method: decision.method,
            user_id: request.user_id.clone(),
            payload,
        };
        worker.handle(&task).await.map_err(|source| DispatchError::Worker {
            agent_id: decision.agent_id,
            source,
        })
    }

    /// Start the background health sweep.
    pub fn start(&self) -> bool {
        self.monitor.start()
    }

    /// Stop background work and wait for it to finish.
    pub async fn shutdown(&self) {
        self.monitor.stop().await;
        let pruned = self.router.rate_limiter().prune_expired();
        debug!(pruned, "control plane shut down");
    }
}

impl std::fmt::Debug for ControlPlane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlPlane")
            .field("bus", &self.bus)
            .field("registry", &self.registry)
            .field("router", &self.router)
            .field("workers", &self.workers.len())
            .finish()
    }
}
