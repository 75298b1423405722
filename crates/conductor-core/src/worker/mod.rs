//! Worker agents: the capability interface and the constructor catalog.

pub mod agent;
pub mod catalog;

pub use agent::{BoxWorkerAgent, EchoWorker, WorkerAgent, WorkerError, WorkerTask};
pub use catalog::{WorkerCatalog, WorkerFactory};
