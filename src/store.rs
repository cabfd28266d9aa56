//! Key-value persistence capability behind the offline queue.
//!
//! The queue keeps its whole list under one named entry, so a store only
//! needs whole-value reads and overwrites.
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("failed to encode queue: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Overwrite the entry wholesale.
    async fn put(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Read-modify-write `key` with no other writer in between, including
    /// writers in other processes. `apply` gets the current value and
    /// returns the replacement, or `None` to leave the entry untouched.
    async fn update(&self, key: &str, apply: &mut UpdateFn<'_>) -> Result<(), StorageError>;
}

pub type UpdateFn<'a> =
    dyn FnMut(Option<String>) -> Result<Option<String>, StorageError> + Send + 'a;

/// Process-local store for tests and throwaway sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let guard = self
            .entries
            .lock()
            .map_err(|_| StorageError::Unavailable("memory store poisoned".into()))?;
        Ok(guard.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut guard = self
            .entries
            .lock()
            .map_err(|_| StorageError::Unavailable("memory store poisoned".into()))?;
        guard.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn update(&self, key: &str, apply: &mut UpdateFn<'_>) -> Result<(), StorageError> {
        let mut guard = self
            .entries
            .lock()
            .map_err(|_| StorageError::Unavailable("memory store poisoned".into()))?;
        if let Some(next) = apply(guard.get(key).cloned())? {
            guard.insert(key.to_string(), next);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_overwrites() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").await.unwrap(), None);
        store.put("k", "one").await.unwrap();
        store.put("k", "two").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("two"));
        assert_eq!(store.get("other").await.unwrap(), None);
    }

    #[tokio::test]
    async fn update_sees_current_value_and_can_skip_the_write() {
        let store = MemoryStore::new();
        store
            .update("k", &mut |current| {
                assert_eq!(current, None);
                Ok(Some("one".into()))
            })
            .await
            .unwrap();
        store.update("k", &mut |_| Ok(None)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("one"));
    }
}
