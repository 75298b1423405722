//! File-backed key-value store.
//!
//! The whole store is one JSON object on disk. Every mutation reads the
//! document, applies the change and writes it back through a temporary file
//! plus rename, so a crash mid-write never leaves a truncated document.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use conductor_core::storage::kv_store::KvStore;
use conductor_types::error::RepositoryError;
use tokio::sync::Mutex;

type Document = BTreeMap<String, serde_json::Value>;

pub struct FileKvStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl FileKvStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Store at `<data_dir>/state.json`.
    pub fn in_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join("state.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Document, RepositoryError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Document::new()),
            Err(err) => {
                return Err(RepositoryError::Unavailable(format!(
                    "failed to read {}: {err}",
                    self.path.display()
                )));
            }
        };
        serde_json::from_str(&content)
            .map_err(|e| RepositoryError::Query(format!("invalid store document: {e}")))
    }

    async fn persist(&self, document: &Document) -> Result<(), RepositoryError> {
        let unavailable = |e: std::io::Error| {
            RepositoryError::Unavailable(format!("failed to write {}: {e}", self.path.display()))
        };

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(unavailable)?;
        }
        let content = serde_json::to_string_pretty(document)
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await.map_err(unavailable)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(unavailable)?;
        Ok(())
    }
}

impl KvStore for FileKvStore {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, RepositoryError> {
        Ok(self.load().await?.remove(key))
    }

    async fn set(&self, key: &str, value: &serde_json::Value) -> Result<(), RepositoryError> {
        let _guard = self.write_lock.lock().await;
        let mut document = self.load().await?;
        document.insert(key.to_string(), value.clone());
        self.persist(&document).await
    }

    async fn delete(&self, key: &str) -> Result<(), RepositoryError> {
        let _guard = self.write_lock.lock().await;
        let mut document = self.load().await?;
        if document.remove(key).is_some() {
            self.persist(&document).await?;
        }
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<String>, RepositoryError> {
        Ok(self.load().await?.into_keys().collect())
    }
}

impl std::fmt::Debug for FileKvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileKvStore")
            .field("path", &self.path)
            .finish()
    }
}
