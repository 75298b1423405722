//! Key-value store trait.
//!
//! The control plane treats persistence as a plain key-value interface over
//! JSON values; it does not own the backing schema. Implementations live in
//! conductor-infra.

use conductor_types::error::RepositoryError;

/// Persistent key-value storage for control-plane snapshots.
///
/// Uses RPITIT (native async fn in traits, Rust 2024 edition).
pub trait KvStore: Send + Sync {
    /// Get a value by key. Returns None if the key does not exist.
    fn get(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = Result<Option<serde_json::Value>, RepositoryError>> + Send;

    /// Set a value for a key (upsert).
    fn set(
        &self,
        key: &str,
        value: &serde_json::Value,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Delete a key. No-op if the key does not exist.
    fn delete(&self, key: &str) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// List all keys, sorted.
    fn list_keys(&self) -> impl std::future::Future<Output = Result<Vec<String>, RepositoryError>> + Send;
}
