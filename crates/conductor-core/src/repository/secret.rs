//! Secret provider trait definition.
//!
//! `SecretProvider` uses RPITIT and is therefore not object-safe. The
//! service holds a heterogeneous chain, so each provider is erased through
//! `SecretProviderDyn` (blanket-implemented, boxed futures) and stored as a
//! `DynSecretProvider`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use conductor_types::error::RepositoryError;
use conductor_types::secret::{SecretEntry, SecretSource};

/// Storage backend for outbound third-party credentials.
pub trait SecretProvider: Send + Sync {
    /// Backend this provider reads from and writes to.
    fn source(&self) -> SecretSource;

    /// Retrieve a secret value. Returns None if this provider does not hold it.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>, RepositoryError>> + Send;

    /// Store a secret value. Read-only providers return `RepositoryError::ReadOnly`.
    fn set(&self, key: &str, value: &str) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    /// Delete a secret. Returns `RepositoryError::NotFound` if absent.
    fn delete(&self, key: &str) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    /// List secret metadata. Never includes values.
    fn list(&self) -> impl Future<Output = Result<Vec<SecretEntry>, RepositoryError>> + Send;
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Object-safe version of [`SecretProvider`] with boxed futures.
pub trait SecretProviderDyn: Send + Sync {
    fn source(&self) -> SecretSource;

    fn get_boxed<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>, RepositoryError>>;

    fn set_boxed<'a>(&'a self, key: &'a str, value: &'a str) -> BoxFuture<'a, Result<(), RepositoryError>>;

    fn delete_boxed<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), RepositoryError>>;

    fn list_boxed(&self) -> BoxFuture<'_, Result<Vec<SecretEntry>, RepositoryError>>;
}

impl<T: SecretProvider> SecretProviderDyn for T {
    fn source(&self) -> SecretSource {
        SecretProvider::source(self)
    }

    fn get_boxed<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>, RepositoryError>> {
        Box::pin(self.get(key))
    }

    fn set_boxed<'a>(&'a self, key: &'a str, value: &'a str) -> BoxFuture<'a, Result<(), RepositoryError>> {
        Box::pin(self.set(key, value))
    }

    fn delete_boxed<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), RepositoryError>> {
        Box::pin(self.delete(key))
    }

    fn list_boxed(&self) -> BoxFuture<'_, Result<Vec<SecretEntry>, RepositoryError>> {
        Box::pin(self.list())
    }
}

/// Shared, type-erased secret provider.
pub type DynSecretProvider = Arc<dyn SecretProviderDyn>;
