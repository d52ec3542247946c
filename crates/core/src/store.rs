//! Key-value capability for auxiliary bookkeeping.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// A durable string-keyed mapping of JSON values.
///
/// Single-key operations are atomic at the store level. Aggregate reads
/// (`keys`, `values`, `items`, `len`) are snapshots taken at call time and may
/// be stale under concurrent mutation; a key removed between enumeration and
/// read is skipped rather than reported as an error.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Get the value stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Store `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: &Value) -> Result<()>;

    /// Delete `key`. Returns `true` if it existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// List all keys. No ordering is guaranteed.
    async fn keys(&self) -> Result<Vec<String>>;

    /// Check whether `key` is present.
    async fn contains_key(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// List all key/value pairs.
    async fn items(&self) -> Result<Vec<(String, Value)>> {
        let mut items = Vec::new();
        for key in self.keys().await? {
            if let Some(value) = self.get(&key).await? {
                items.push((key, value));
            }
        }
        Ok(items)
    }

    /// List all values.
    async fn values(&self) -> Result<Vec<Value>> {
        Ok(self.items().await?.into_iter().map(|(_, v)| v).collect())
    }

    /// Number of keys.
    async fn len(&self) -> Result<usize> {
        Ok(self.keys().await?.len())
    }

    /// Whether the mapping has no keys.
    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}
