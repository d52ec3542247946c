//! JSON key-value mapping stored as plain Redis strings.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde_json::Value;
use spiderq_core::{KeyValueStore, QueueConfig, QueueError, Result};
use std::collections::BTreeSet;

use crate::{connect, RedisKeys};

/// Default table name for mappings.
pub const DEFAULT_DICT_TABLE: &str = "dict";

/// Keys fetched per SCAN round trip.
const SCAN_COUNT: usize = 500;

/// Escape Redis glob metacharacters so `s` matches only itself.
fn escape_glob(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// String-keyed mapping of JSON values scoped under a key prefix.
///
/// Each entry is its own Redis string key, `{prefix}{key}`, so single-key
/// reads and writes are atomic. Enumeration walks the prefix with `SCAN` and
/// may miss or include keys changed while it runs.
#[derive(Clone)]
pub struct RedisDict {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisDict {
    /// Connect to the mapping `database`/`table` using the Redis settings
    /// in `config`.
    pub async fn new(config: &QueueConfig, database: &str, table: &str) -> Result<Self> {
        let conn = connect(&config.redis_url()).await?;
        let prefix = RedisKeys::new(&config.namespace).dict_prefix(database, table);
        Ok(Self { conn, prefix })
    }

    /// Create a mapping over an existing connection manager.
    pub fn with_connection(conn: ConnectionManager, prefix: impl Into<String>) -> Self {
        Self {
            conn,
            prefix: prefix.into(),
        }
    }

    /// The prefix every stored key starts with.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

impl std::fmt::Debug for RedisDict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisDict")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl KeyValueStore for RedisDict {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(self.full_key(key))
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;

        match raw {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &Value) -> Result<()> {
        let text = serde_json::to_string(value)?;
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(self.full_key(key), text)
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let deleted: usize = conn
            .del(self.full_key(key))
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;
        Ok(deleted > 0)
    }

    async fn contains_key(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let exists: bool = conn
            .exists(self.full_key(key))
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;
        Ok(exists)
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", escape_glob(&self.prefix));

        // SCAN may report a key more than once.
        let mut keys = BTreeSet::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await
                .map_err(|e| QueueError::Backend(e.to_string()))?;

            keys.extend(
                batch
                    .iter()
                    .filter_map(|k| k.strip_prefix(self.prefix.as_str()))
                    .map(str::to_string),
            );

            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(keys.into_iter().collect())
    }

    async fn items(&self) -> Result<Vec<(String, Value)>> {
        let keys = self.keys().await?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.conn.clone();
        let full_keys: Vec<String> = keys.iter().map(|k| self.full_key(k)).collect();
        let raw: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&full_keys)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;

        let mut items = Vec::with_capacity(keys.len());
        for (key, text) in keys.into_iter().zip(raw) {
            // Deleted since the scan.
            let Some(text) = text else { continue };
            items.push((key, serde_json::from_str(&text)?));
        }
        Ok(items)
    }
}


// ========== Integration Tests (require Redis) ==========
