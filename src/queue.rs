//! Durable FIFO of scans that have not reached the attendance service yet.
//!
//! The whole list lives under one store entry as a JSON array. Every mutation
//! is a single atomic read-modify-write on that entry, so a write from
//! another process (or an earlier session) is never clobbered by a stale copy.
use crate::model::QueuedSubmission;
use crate::store::{KeyValueStore, StorageError};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

pub struct OfflineQueue {
    store: Arc<dyn KeyValueStore>,
    key: String,
}

impl std::fmt::Debug for OfflineQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineQueue")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl OfflineQueue {
    pub fn new(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Current persisted list in enqueue order.
    ///
    /// A missing entry, unparsable JSON or a non-array value all read as an
    /// empty queue. Individual elements that do not decode are dropped.
    #[instrument(skip_all, fields(key = %self.key))]
    pub async fn load(&self) -> Result<Vec<QueuedSubmission>, StorageError> {
        let Some(raw) = self.store.get(&self.key).await? else {
            return Ok(Vec::new());
        };
        Ok(decode_list(&raw))
    }

    /// Overwrite the persisted list.
    #[instrument(skip_all, fields(key = %self.key, len = entries.len()))]
    pub async fn save(&self, entries: &[QueuedSubmission]) -> Result<(), StorageError> {
        let encoded = serde_json::to_string(entries)?;
        self.store.put(&self.key, &encoded).await
    }

    /// Append `payload` behind everything already persisted. Returns the new
    /// entry together with the resulting queue length.
    #[instrument(skip_all, fields(key = %self.key))]
    pub async fn enqueue(
        &self,
        payload: &str,
    ) -> Result<(QueuedSubmission, usize), StorageError> {
        let entry = QueuedSubmission::new(payload);
        let mut len = 0;
        self.store
            .update(&self.key, &mut |current| {
                let mut entries = current.as_deref().map(decode_list).unwrap_or_default();
                entries.push(entry.clone());
                len = entries.len();
                Ok(Some(serde_json::to_string(&entries)?))
            })
            .await?;
        debug!(id = %entry.id, len, "scan queued offline");
        Ok((entry, len))
    }

    /// Drop the given ids from the latest persisted list in a single write.
    /// Entries appended since the caller's snapshot are kept in place.
    /// Returns the remaining length.
    #[instrument(skip_all, fields(key = %self.key, removing = ids.len()))]
    pub async fn remove(&self, ids: &HashSet<String>) -> Result<usize, StorageError> {
        let mut remaining = 0;
        self.store
            .update(&self.key, &mut |current| {
                let current = current.as_deref().map(decode_list).unwrap_or_default();
                let before = current.len();
                let retained: Vec<QueuedSubmission> = current
                    .into_iter()
                    .filter(|entry| !ids.contains(&entry.id))
                    .collect();
                remaining = retained.len();
                if retained.len() == before {
                    return Ok(None);
                }
                Ok(Some(serde_json::to_string(&retained)?))
            })
            .await?;
        Ok(remaining)
    }

    pub async fn len(&self) -> Result<usize, StorageError> {
        Ok(self.load().await?.len())
    }

    pub async fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len().await? == 0)
    }
}

fn decode_list(raw: &str) -> Vec<QueuedSubmission> {
    let items = match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(items)) => items,
        Ok(other) => {
            warn!(kind = value_kind(&other), "stored queue is not a list; resetting");
            return Vec::new();
        }
        Err(err) => {
            warn!(?err, "stored queue is not valid JSON; resetting");
            return Vec::new();
        }
    };

    let total = items.len();
    let entries: Vec<QueuedSubmission> = items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect();
    if entries.len() != total {
        warn!(
            dropped = total - entries.len(),
            "discarded malformed queue entries"
        );
    }
    entries
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
