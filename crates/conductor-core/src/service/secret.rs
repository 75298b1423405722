//! Secret management service.
//!
//! Credentials for outbound calls are resolved through a chain of providers
//! in priority order (first match wins). Values leave the service only
//! wrapped in `Redacted`; listings carry names and metadata, never values.

use std::collections::HashSet;

use conductor_types::error::RepositoryError;
use conductor_types::secret::{Redacted, SecretEntry};
use tracing::debug;

use crate::repository::secret::DynSecretProvider;

/// Name -> credential store backed by an ordered provider chain.
pub struct SecretService {
    providers: Vec<DynSecretProvider>,
}

impl SecretService {
    /// Providers should be ordered by precedence (highest priority first).
    pub fn new(providers: Vec<DynSecretProvider>) -> Self {
        Self { providers }
    }

    /// Resolve a secret by iterating providers in priority order.
    pub async fn get(&self, key: &str) -> Result<Option<Redacted>, RepositoryError> {
        for provider in &self.providers {
            if let Some(value) = provider.get_boxed(key).await? {
                return Ok(Some(Redacted::new(value)));
            }
        }
        Ok(None)
    }

    /// Store a secret in the first writable provider.
    ///
    /// Read-only providers (environment) reject the write and are skipped.
    pub async fn store(&self, key: &str, value: &str) -> Result<(), RepositoryError> {
        for provider in &self.providers {
            match provider.set_boxed(key, value).await {
                Ok(()) => {
                    debug!(key, source = %provider.source(), "stored secret");
                    return Ok(());
                }
                Err(_) => continue,
            }
        }

        Err(RepositoryError::ReadOnly(
            "no writable secret provider available".to_string(),
        ))
    }

    /// Delete a secret from every provider that holds it.
    ///
    /// Returns `NotFound` if no provider deleted anything.
    pub async fn delete(&self, key: &str) -> Result<(), RepositoryError> {
        let mut deleted = false;
        for provider in &self.providers {
            if provider.delete_boxed(key).await.is_ok() {
                deleted = true;
            }
        }

        if deleted {
            debug!(key, "deleted secret");
            Ok(())
        } else {
            Err(RepositoryError::NotFound)
        }
    }

    /// Secret names across all providers, deduplicated, sorted by key.
    ///
    /// For a name held by several providers, the highest-priority provider's
    /// entry is kept. Unavailable providers are skipped.
    pub async fn list_names(&self) -> Result<Vec<SecretEntry>, RepositoryError> {
        let mut seen = HashSet::new();
        let mut entries = Vec::new();

        for provider in &self.providers {
            let Ok(provider_entries) = provider.list_boxed().await else {
                continue;
            };
            for entry in provider_entries {
                if seen.insert(entry.key.clone()) {
                    entries.push(entry);
                }
            }
        }

        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }
}

impl std::fmt::Debug for SecretService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sources: Vec<String> = self.providers.iter().map(|p| p.source().to_string()).collect();
        f.debug_struct("SecretService")
            .field("providers", &sources)
            .finish()
    }
}
