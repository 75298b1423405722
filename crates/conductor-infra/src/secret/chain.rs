//! Secret chain builder: wires concrete providers in priority order.
//!
//! Lives in `conductor-infra` because it assembles concrete providers. The
//! resulting chain is handed to `SecretService` in `conductor-core` as
//! `DynSecretProvider`s.

use std::sync::Arc;

use conductor_core::repository::secret::DynSecretProvider;
use conductor_core::service::secret::SecretService;

use super::env::EnvSecretProvider;
use super::memory::MemorySecretProvider;

/// Build the default resolution chain (first match wins):
/// 1. Environment variables (if `include_env` is true)
/// 2. In-memory store (always included, receives writes)
pub fn build_secret_chain(memory: MemorySecretProvider, include_env: bool) -> Vec<DynSecretProvider> {
    let mut chain: Vec<DynSecretProvider> = Vec::new();

    if include_env {
        chain.push(Arc::new(EnvSecretProvider::new()));
    }
    chain.push(Arc::new(memory));

    chain
}

/// A `SecretService` over the default chain.
pub fn default_secret_service(include_env: bool) -> SecretService {
    SecretService::new(build_secret_chain(MemorySecretProvider::new(), include_env))
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_types::secret::SecretSource;

    #[test]
    fn test_chain_order() {
        let chain = build_secret_chain(MemorySecretProvider::new(), true);
        let sources: Vec<SecretSource> = chain.iter().map(|p| p.source()).collect();
        assert_eq!(sources, vec![SecretSource::Environment, SecretSource::Memory]);

        let chain = build_secret_chain(MemorySecretProvider::new(), false);
        assert_eq!(chain.len(), 1);
    }

    #[tokio::test]
    async fn test_default_service_stores_in_memory() {
        let service = default_secret_service(true);
        service.store("CNDR_CHAIN_TEST_KEY", "s3cret-value").await.unwrap();

        let value = service.get("CNDR_CHAIN_TEST_KEY").await.unwrap().unwrap();
        assert_eq!(value.expose(), "s3cret-value");

        let names = service.list_names().await.unwrap();
        assert!(names.iter().any(|e| e.key.as_str() == "CNDR_CHAIN_TEST_KEY"
            && e.source == SecretSource::Memory));
    }
}
