//! WorkerAgent trait and its object-safe wrapper.
//!
//! `WorkerAgent` uses RPITIT, so it cannot be a trait object directly.
//! The same blanket-impl pattern as the secret providers applies:
//! 1. `WorkerAgentDyn` is object-safe with boxed futures
//! 2. every `T: WorkerAgent` implements it
//! 3. `BoxWorkerAgent` wraps `Box<dyn WorkerAgentDyn>` and delegates

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A unit of work handed to a worker after routing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerTask {
    pub agent_id: String,
    pub path: String,
    pub method: String,
    pub user_id: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("task failed: {0}")]
    Failed(String),

    #[error("unsupported task: {0}")]
    Unsupported(String),
}

/// Capability interface every worker agent type implements once.
pub trait WorkerAgent: Send + Sync {
    /// Agent type this worker implements (the catalog key).
    fn agent_type(&self) -> &str;

    fn capabilities(&self) -> &[String];

    /// Execute a routed task.
    fn handle(
        &self,
        task: &WorkerTask,
    ) -> impl Future<Output = Result<serde_json::Value, WorkerError>> + Send;
}

/// Object-safe version of [`WorkerAgent`] with boxed futures.
pub trait WorkerAgentDyn: Send + Sync {
    fn agent_type(&self) -> &str;

    fn capabilities(&self) -> &[String];

    fn handle_boxed<'a>(
        &'a self,
        task: &'a WorkerTask,
    ) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, WorkerError>> + Send + 'a>>;
}

impl<T: WorkerAgent> WorkerAgentDyn for T {
    fn agent_type(&self) -> &str {
        WorkerAgent::agent_type(self)
    }

    fn capabilities(&self) -> &[String] {
        WorkerAgent::capabilities(self)
    }

    fn handle_boxed<'a>(
        &'a self,
        task: &'a WorkerTask,
    ) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, WorkerError>> + Send + 'a>> {
        Box::pin(self.handle(task))
    }
}

/// Type-erased worker agent for runtime selection by agent type.
pub struct BoxWorkerAgent {
    inner: Box<dyn WorkerAgentDyn>,
}

impl BoxWorkerAgent {
    pub fn new<T: WorkerAgent + 'static>(worker: T) -> Self {
        Self {
            inner: Box::new(worker),
        }
    }

    pub fn agent_type(&self) -> &str {
        self.inner.agent_type()
    }

    pub fn capabilities(&self) -> &[String] {
        self.inner.capabilities()
    }

    pub async fn handle(&self, task: &WorkerTask) -> Result<serde_json::Value, WorkerError> {
        self.inner.handle_boxed(task).await
    }
}

impl std::fmt::Debug for BoxWorkerAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxWorkerAgent")
            .field("agent_type", &self.agent_type())
            .finish()
    }
}

/// Acknowledges every task by echoing it back.
///
/// Stands in for executors that run out of process and are reached only
/// through routing.
pub struct EchoWorker {
    agent_type: String,
    capabilities: Vec<String>,
}

impl EchoWorker {
    pub fn new(agent_type: impl Into<String>, capabilities: Vec<String>) -> Self {
        Self {
            agent_type: agent_type.into(),
            capabilities,
        }
    }
}

impl WorkerAgent for EchoWorker {
    fn agent_type(&self) -> &str {
        &self.agent_type
    }

    fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    async fn handle(&self, task: &WorkerTask) -> Result<serde_json::Value, WorkerError> {
        Ok(serde_json::json!({
            "agent_id": task.agent_id,
            "agent_type": self.agent_type,
            "path": task.path,
            "accepted": task.payload,
        }))
    }
}
