//! Redis backend for spiderq.
//!
//! This crate provides the remote priority queue, stored as one sorted set
//! per project queue, and [`RedisDict`], a JSON key-value mapping used for
//! auxiliary bookkeeping.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use spiderq_core::{QueueConfig, SpiderQueue};
//! use spiderq_redis::RedisSpiderQueue;
//!
//! #[tokio::main]
//! async fn main() -> spiderq_core::Result<()> {
//!     let config = QueueConfig::builder().host("localhost").project("quotes").build();
//!     let queue = RedisSpiderQueue::new(&config).await?;
//!     let next = queue.pop().await?;
//!     Ok(())
//! }
//! ```

mod dict;

pub use dict::{RedisDict, DEFAULT_DICT_TABLE};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde_json::{Map, Value};
use spiderq_core::{
    check_priority, decode, encode, JobRecord, Predicate, QueueConfig, QueueError, Result,
    SpiderQueue,
};
use std::time::Duration;

/// Separator between the parts of a key.
const KEY_DELIMITER: char = '.';

/// Upper bound on establishing the first connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Builds Redis key names under a namespace prefix.
#[derive(Debug, Clone)]
pub struct RedisKeys {
    namespace: String,
}

impl RedisKeys {
    /// Create a new RedisKeys instance with the given namespace.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    /// Get the namespace.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Key for a project's queue (ZSET).
    /// Members are encoded job records, scores are their priorities.
    pub fn queue(&self, project: &str, table: &str) -> String {
        format!(
            "{}{d}{}{d}{}",
            self.namespace,
            project,
            table,
            d = KEY_DELIMITER
        )
    }

    /// Prefix shared by every entry of a mapping (STRING keys).
    pub fn dict_prefix(&self, database: &str, table: &str) -> String {
        format!(
            "{}{d}{}{d}{}:",
            self.namespace,
            database,
            table,
            d = KEY_DELIMITER
        )
    }
}

/// Open a managed connection, failing fast if the server is unreachable.
///
/// The manager retries with backoff when a live connection drops, but the
/// first attempt is made exactly once and bounded by a timeout.
pub async fn connect(redis_url: &str) -> Result<ConnectionManager> {
    let client = redis::Client::open(redis_url)
        .map_err(|e| QueueError::Connection(format!("Invalid Redis URL: {}", e)))?;

    tokio::time::timeout(CONNECT_TIMEOUT, client.get_multiplexed_async_connection())
        .await
        .map_err(|_| {
            QueueError::Connection(format!(
                "Timed out connecting to Redis after {:?}",
                CONNECT_TIMEOUT
            ))
        })?
        .map_err(|e| QueueError::Connection(format!("Failed to connect to Redis: {}", e)))?;

    ConnectionManager::new(client)
        .await
        .map_err(|e| QueueError::Connection(format!("Failed to connect to Redis: {}", e)))
}

/// Priority queue stored in a Redis sorted set.
///
/// Each distinct encoded record is one member. Adding a record that is
/// already queued raises its score by the new priority rather than adding a
/// second entry, and `pop` returns `None` when another consumer removed the
/// head member first. See [`SpiderQueue`] for what callers should expect.
#[derive(Clone)]
pub struct RedisSpiderQueue {
    conn: ConnectionManager,
    key: String,
    race_window: Option<Duration>,
}

impl RedisSpiderQueue {
    /// Connect to the queue described by `config`.
    pub async fn new(config: &QueueConfig) -> Result<Self> {
        config.validate()?;
        let conn = connect(&config.redis_url()).await?;
        let key = RedisKeys::new(&config.namespace).queue(&config.project, &config.table);
        tracing::info!(key = %key, host = %config.host, port = config.port, "Redis queue opened");
        Ok(Self::with_connection(conn, key))
    }

    /// Create a queue over an existing connection manager.
    pub fn with_connection(conn: ConnectionManager, key: impl Into<String>) -> Self {
        Self {
            conn,
            key: key.into(),
            race_window: None,
        }
    }

    /// Pause between reading members and removing them, widening the window
    /// in which a competing consumer can take a member first.
    #[cfg(test)]
    fn with_race_window(mut self, window: Duration) -> Self {
        self.race_window = Some(window);
        self
    }

    async fn pause_for_race_window(&self) {
        if let Some(window) = self.race_window {
            tokio::time::sleep(window).await;
        }
    }

    /// The sorted-set key holding this queue.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl std::fmt::Debug for RedisSpiderQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisSpiderQueue")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SpiderQueue for RedisSpiderQueue {
    async fn add(&self, name: &str, priority: f64, args: Map<String, Value>) -> Result<()> {
        check_priority(priority)?;
        let payload = encode(&JobRecord::with_args(name, args))?;
        let mut conn = self.conn.clone();
        let score: f64 = conn
            .zincr(&self.key, &payload, priority)
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;

        tracing::debug!(key = %self.key, job = %name, priority, score, "Job queued");
        Ok(())
    }

    async fn pop(&self) -> Result<Option<JobRecord>> {
        let mut conn = self.conn.clone();
        let head: Vec<String> = conn
            .zrevrange(&self.key, 0, 0)
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;

        let Some(member) = head.into_iter().next() else {
            return Ok(None);
        };
        self.pause_for_race_window().await;

        // ZREM is the claim: only the caller that actually removes the member
        // gets to return it.
        let removed: usize = conn
            .zrem(&self.key, &member)
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;
        if removed == 0 {
            tracing::trace!(key = %self.key, "Member vanished before removal");
            return Ok(None);
        }

        let record = decode(&member)?;
        tracing::debug!(key = %self.key, job = %record.name(), "Job popped");
        Ok(Some(record))
    }

    async fn count(&self) -> Result<usize> {
        let mut conn = self.conn.clone();
        let len: usize = conn
            .zcard(&self.key)
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;
        Ok(len)
    }

    async fn list(&self) -> Result<Vec<(JobRecord, f64)>> {
        let mut conn = self.conn.clone();
        let members: Vec<(String, f64)> = conn
            .zrange_withscores(&self.key, 0, -1)
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;

        members
            .into_iter()
            .map(|(member, score)| decode(&member).map(|record| (record, score)))
            .collect()
    }

    async fn remove(&self, predicate: Predicate<'_>) -> Result<usize> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn
            .zrange(&self.key, 0, -1)
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;
        self.pause_for_race_window().await;

        let mut removed = 0;
        for member in members {
            if !predicate(&decode(&member)?) {
                continue;
            }
            // A concurrent pop may have taken it already; count confirmed
            // removals only.
            let n: usize = conn
                .zrem(&self.key, &member)
                .await
                .map_err(|e| QueueError::Backend(e.to_string()))?;
            removed += n;
        }

        tracing::debug!(key = %self.key, removed, "Jobs removed");
        Ok(removed)
    }

    async fn clear(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(&self.key)
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;

        tracing::debug!(key = %self.key, "Queue cleared");
        Ok(())
    }
}


// ========== Integration Tests (require Redis) ==========
