//! Environment variable secret provider.
//!
//! A read-only provider and the highest-priority link in the chain: env vars
//! override every other backend.
//!
//! Key resolution: first `CONDUCTOR_SECRET_{KEY}`, then `KEY` directly.
//! Only the prefixed form can be enumerated, so `list` reports those names.

use chrono::Utc;
use conductor_core::repository::secret::SecretProvider;
use conductor_types::error::RepositoryError;
use conductor_types::secret::{SecretEntry, SecretKey, SecretSource};

/// Prefix marking an environment variable as a control-plane secret.
pub const SECRET_ENV_PREFIX: &str = "CONDUCTOR_SECRET_";

/// Read-only: `set()` and `delete()` return `RepositoryError::ReadOnly`
/// because environment variables cannot be persistently modified.
pub struct EnvSecretProvider {
    prefix: String,
}

impl EnvSecretProvider {
    pub fn new() -> Self {
        Self::with_prefix(SECRET_ENV_PREFIX)
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    fn read(name: &str) -> Option<String> {
        // Non-Unicode values are treated as absent; secrets must be strings.
        std::env::var(name).ok()
    }
}

impl Default for EnvSecretProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretProvider for EnvSecretProvider {
    fn source(&self) -> SecretSource {
        SecretSource::Environment
    }

    async fn get(&self, key: &str) -> Result<Option<String>, RepositoryError> {
        Ok(Self::read(&format!("{}{key}", self.prefix)).or_else(|| Self::read(key)))
    }

    async fn set(&self, _key: &str, _value: &str) -> Result<(), RepositoryError> {
        Err(RepositoryError::ReadOnly(
            "environment variable provider is read-only".to_string(),
        ))
    }

    async fn delete(&self, _key: &str) -> Result<(), RepositoryError> {
        Err(RepositoryError::ReadOnly(
            "environment variable provider is read-only".to_string(),
        ))
    }

    async fn list(&self) -> Result<Vec<SecretEntry>, RepositoryError> {
        let now = Utc::now();
        let mut entries: Vec<SecretEntry> = std::env::vars_os()
            .filter_map(|(name, _)| name.into_string().ok())
            .filter_map(|name| name.strip_prefix(&self.prefix).map(str::to_string))
            .filter(|key| !key.is_empty())
            .map(|key| SecretEntry {
                key: SecretKey::new(key),
                source: SecretSource::Environment,
                updated_at: now,
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }
}
