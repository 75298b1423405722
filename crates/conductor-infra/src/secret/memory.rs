//! Process-local writable secret provider.

use chrono::{DateTime, Utc};
use conductor_core::repository::secret::SecretProvider;
use conductor_types::error::RepositoryError;
use conductor_types::secret::{SecretEntry, SecretKey, SecretSource};
use dashmap::DashMap;

struct Stored {
    value: String,
    updated_at: DateTime<Utc>,
}

/// Secrets held in memory for the lifetime of the process.
#[derive(Default)]
pub struct MemorySecretProvider {
    secrets: DashMap<String, Stored>,
}

impl MemorySecretProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecretProvider for MemorySecretProvider {
    fn source(&self) -> SecretSource {
        SecretSource::Memory
    }

    async fn get(&self, key: &str) -> Result<Option<String>, RepositoryError> {
        Ok(self.secrets.get(key).map(|s| s.value.clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), RepositoryError> {
        self.secrets.insert(
            key.to_string(),
            Stored {
                value: value.to_string(),
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), RepositoryError> {
        self.secrets
            .remove(key)
            .map(|_| ())
            .ok_or(RepositoryError::NotFound)
    }

    async fn list(&self) -> Result<Vec<SecretEntry>, RepositoryError> {
        let mut entries: Vec<SecretEntry> = self
            .secrets
            .iter()
            .map(|s| SecretEntry {
                key: SecretKey::new(s.key().clone()),
                source: SecretSource::Memory,
                updated_at: s.updated_at,
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }
}

impl std::fmt::Debug for MemorySecretProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySecretProvider")
            .field("secrets", &self.secrets.len())
            .finish()
    }
}
