//! Secret provider implementations.
//!
//! - `env`: environment variable provider (read-only, highest priority)
//! - `memory`: process-local writable provider
//! - `chain`: wires the providers together in priority order

pub mod chain;
pub mod env;
pub mod memory;

pub use env::EnvSecretProvider;
pub use memory::MemorySecretProvider;
