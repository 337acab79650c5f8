//! Key-value persistence for engine state.
//!
//! The engine persists three collections: read status, badge counts and
//! per-chat notification settings, each as one serialized value under a
//! well-known key. [`MemoryStore`] backs tests and hosts without durable
//! storage, [`FileStore`] keeps one file per key on disk.

use async_trait::async_trait;
use dashmap::DashMap;
use std::io;
use std::path::PathBuf;
use thiserror::Error;
use tokio::fs;

/// Key for the persisted read-status collection.
pub const READ_STATUS_KEY: &str = "privapp-read-status";
/// Key for the persisted badge-count collection.
pub const BADGE_COUNTS_KEY: &str = "privapp-notifications";
/// Key for the persisted per-chat notification settings.
pub const SETTINGS_KEY: &str = "notificationSettings";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Abstract string key-value store.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).map(|e| e.value().clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

/// File-backed store keeping one file per key under a base directory.
pub struct FileStore {
    base_path: PathBuf,
}

impl FileStore {
    pub async fn new(path: impl Into<PathBuf>) -> io::Result<Self> {
        let base_path = path.into();
        fs::create_dir_all(&base_path).await?;
        Ok(Self { base_path })
    }

    fn sanitize_filename(key: &str) -> String {
        key.replace(|c: char| !c.is_alphanumeric() && c != '.' && c != '-', "_")
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.base_path
            .join(format!("{}.json", Self::sanitize_filename(key)))
    }
}

#[async_trait]
impl KvStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.path_for(key)).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        fs::write(self.path_for(key), value)
            .await
            .map_err(StoreError::Io)
    }

    async fn remove(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore")
            .field("base_path", &self.base_path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").await.unwrap(), None);
        store.set("k", "v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
        store.remove("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).await.unwrap();

        store.set(READ_STATUS_KEY, "[]").await.unwrap();
        assert_eq!(
            store.get(READ_STATUS_KEY).await.unwrap(),
            Some("[]".to_string())
        );

        // removing a missing key is not an error
        store.remove("missing").await.unwrap();

        store.remove(READ_STATUS_KEY).await.unwrap();
        assert_eq!(store.get(READ_STATUS_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_store_sanitizes_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).await.unwrap();

        store.set("../escape/attempt", "x").await.unwrap();
        assert_eq!(
            store.get("../escape/attempt").await.unwrap(),
            Some("x".to_string())
        );
        // nothing was written outside the base directory
        assert!(!dir.path().join("..").join("escape").exists());
    }
}
