//! In-memory key-value store.

use conductor_core::storage::kv_store::KvStore;
use conductor_types::error::RepositoryError;
use dashmap::DashMap;

/// Process-local `KvStore`; contents are lost on drop.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: DashMap<String, serde_json::Value>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, RepositoryError> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    async fn set(&self, key: &str, value: &serde_json::Value) -> Result<(), RepositoryError> {
        self.entries.insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), RepositoryError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<String>, RepositoryError> {
        let mut keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = MemoryKvStore::new();
        store.set("b", &json!({"n": 1})).await.unwrap();
        store.set("a", &json!([1, 2])).await.unwrap();

        assert_eq!(store.get("b").await.unwrap(), Some(json!({"n": 1})));
        assert_eq!(store.list_keys().await.unwrap(), vec!["a", "b"]);

        store.delete("b").await.unwrap();
        store.delete("never-existed").await.unwrap();
        assert!(store.get("b").await.unwrap().is_none());
        assert_eq!(store.len(), 1);
    }
}
