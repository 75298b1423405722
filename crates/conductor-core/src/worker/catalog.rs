//! Registry of worker constructors, keyed by agent type.
//!
//! New agent types are added by registering one constructor; the control
//! plane builds an instance per registered agent from its registration.

use std::collections::HashMap;
use std::sync::Arc;

use conductor_types::agent::AgentRegistration;

use super::agent::{BoxWorkerAgent, EchoWorker, WorkerAgent};

/// Builds a worker for one agent registration.
pub type WorkerFactory = Arc<dyn Fn(&AgentRegistration) -> BoxWorkerAgent + Send + Sync>;

#[derive(Clone, Default)]
pub struct WorkerCatalog {
    factories: HashMap<String, WorkerFactory>,
}

impl WorkerCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor for `agent_type`, replacing any existing one.
    pub fn register(&mut self, agent_type: impl Into<String>, factory: WorkerFactory) {
        self.factories.insert(agent_type.into(), factory);
    }

    /// Register a constructor from a plain closure returning a concrete worker.
    pub fn register_with<T, F>(&mut self, agent_type: impl Into<String>, build: F)
    where
        T: WorkerAgent + 'static,
        F: Fn(&AgentRegistration) -> T + Send + Sync + 'static,
    {
        self.register(agent_type, Arc::new(move |reg: &AgentRegistration| BoxWorkerAgent::new(build(reg))));
    }

    /// Register an [`EchoWorker`] for `agent_type`.
    pub fn register_echo(&mut self, agent_type: impl Into<String>) {
        let agent_type = agent_type.into();
        let key = agent_type.clone();
        self.register_with(key, move |reg: &AgentRegistration| {
            EchoWorker::new(agent_type.clone(), reg.capabilities.clone())
        });
    }

    pub fn contains(&self, agent_type: &str) -> bool {
        self.factories.contains_key(agent_type)
    }

    /// Registered agent types, sorted.
    pub fn types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// Build a worker for a registration, if its type is known.
    pub fn build(&self, registration: &AgentRegistration) -> Option<BoxWorkerAgent> {
        self.factories
            .get(&registration.agent_type)
            .map(|factory| factory(registration))
    }
}

impl std::fmt::Debug for WorkerCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerCatalog")
            .field("types", &self.types())
            .finish()
    }
}
