//! SQLite backend for spiderq.
//!
//! This crate provides the embedded, file-backed priority queue. Several
//! processes may open the same database file; SQLite's locking serialises
//! their writes and the queue turns "select the head, then delete it" into an
//! atomic claim by retrying whenever the delete finds the row already gone.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use spiderq_core::{JobRecord, SpiderQueue};
//! use spiderq_sqlite::SqlitePriorityQueue;
//!
//! #[tokio::main]
//! async fn main() -> spiderq_core::Result<()> {
//!     let queue = SqlitePriorityQueue::new("sqlite:queue.db", "spider_queue").await?;
//!     queue.put(&JobRecord::new("fetch").arg("url", "https://example.com"), 1.0).await?;
//!     let next = queue.pop().await?;
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use serde_json::{Map, Value};
use spiderq_core::record::{decode_bytes, encode_bytes};
use spiderq_core::{
    check_priority, JobRecord, Predicate, QueueConfig, QueueError, Result, SpiderQueue,
};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

/// How long a statement waits on another connection's lock before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

/// Whether a database error is a lock conflict with another connection.
///
/// SQLite reports extended result codes; the low byte is the primary code.
fn is_conflict(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .map(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED))
            .unwrap_or(false),
        _ => false,
    }
}

fn check_table_name(table: &str) -> Result<()> {
    let mut chars = table.chars();
    let valid = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false)
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(QueueError::Config(format!(
            "Invalid SQLite table name: {:?}",
            table
        )))
    }
}

/// Outcome of trying to delete a selected row.
enum Claim {
    Taken,
    Vanished,
}

/// Priority queue stored in a single SQLite table.
///
/// Rows are `(id INTEGER PRIMARY KEY, priority REAL, message BLOB)`. The
/// highest priority pops first; equal priorities pop in insertion order.
#[derive(Clone, Debug)]
pub struct SqlitePriorityQueue {
    pool: SqlitePool,
    table: String,
    race_window: Option<Duration>,
}

impl SqlitePriorityQueue {
    /// Open (or create) a queue table.
    ///
    /// The database_url should be in the format: `sqlite:path/to/db.sqlite` or `sqlite::memory:`
    pub async fn new(database_url: &str, table: &str) -> Result<Self> {
        check_table_name(table)?;

        let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");
        let mut options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| QueueError::Connection(format!("Invalid SQLite URL: {}", e)))?
            .create_if_missing(true)
            .busy_timeout(BUSY_TIMEOUT);
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // One connection per queue instance. An in-memory database lives and
        // dies with its connection, so it must never be recycled.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| QueueError::Connection(format!("Failed to open SQLite: {}", e)))?;

        let queue = Self {
            pool,
            table: table.to_string(),
            race_window: None,
        };

        queue.init_table().await?;

        tracing::info!(table = %queue.table, in_memory, "SQLite queue opened");
        Ok(queue)
    }

    /// Create an in-memory queue (useful for testing).
    pub async fn in_memory(table: &str) -> Result<Self> {
        Self::new("sqlite::memory:", table).await
    }

    /// Pause between selecting the head row and deleting it, widening the
    /// window in which a competing consumer can take the row first.
    #[cfg(test)]
    fn with_race_window(mut self, window: Duration) -> Self {
        self.race_window = Some(window);
        self
    }

    /// The table this queue lives in.
    pub fn table(&self) -> &str {
        &self.table
    }

    async fn init_table(&self) -> Result<()> {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id INTEGER PRIMARY KEY,
                priority REAL NOT NULL DEFAULT 0,
                message BLOB NOT NULL
            )
            "#,
            self.table
        ))
        .execute(&self.pool)
        .await
        .map_err(|e| QueueError::Backend(format!("Failed to create queue table: {}", e)))?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{}_priority ON {} (priority DESC, id)",
            self.table, self.table
        ))
        .execute(&self.pool)
        .await
        .map_err(|e| QueueError::Backend(format!("Failed to create priority index: {}", e)))?;

        Ok(())
    }

    /// Insert a record. Committed before return.
    ///
    /// NaN and infinite priorities are rejected before touching the database.
    pub async fn put(&self, record: &JobRecord, priority: f64) -> Result<()> {
        check_priority(priority)?;
        let message = encode_bytes(record)?;
        sqlx::query(&format!(
            "INSERT INTO {} (priority, message) VALUES (?, ?)",
            self.table
        ))
        .bind(priority)
        .bind(message)
        .execute(&self.pool)
        .await
        .map_err(|e| QueueError::Backend(format!("Failed to insert job: {}", e)))?;

        tracing::debug!(table = %self.table, job = %record.name(), priority, "Job queued");
        Ok(())
    }

    /// Remove and return the highest-priority record, or `None` if the queue
    /// is empty.
    ///
    /// Retries without limit while other consumers keep winning the race for
    /// the head row, so sustained heavy contention can delay this call
    /// indefinitely.
    pub async fn pop(&self) -> Result<Option<JobRecord>> {
        loop {
            let head: Option<(i64, Vec<u8>)> = sqlx::query_as(&format!(
                "SELECT id, message FROM {} ORDER BY priority DESC, id ASC LIMIT 1",
                self.table
            ))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| QueueError::Backend(format!("Failed to select job: {}", e)))?;

            let Some((id, message)) = head else {
                return Ok(None);
            };

            if let Some(window) = self.race_window {
                tokio::time::sleep(window).await;
            }

            match self.claim(id).await? {
                Claim::Taken => {
                    let record = decode_bytes(&message)?;
                    tracing::debug!(table = %self.table, id, job = %record.name(), "Job popped");
                    return Ok(Some(record));
                }
                Claim::Vanished => {
                    tracing::trace!(table = %self.table, id, "Row vanished, retrying pop");
                }
            }
        }
    }

    /// Delete one row by id in its own transaction.
    async fn claim(&self, id: i64) -> Result<Claim> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| QueueError::Backend(format!("Failed to begin transaction: {}", e)))?;

        let deleted = sqlx::query(&format!("DELETE FROM {} WHERE id = ?", self.table))
            .bind(id)
            .execute(&mut *tx)
            .await;

        match deleted {
            Ok(done) if done.rows_affected() > 0 => match tx.commit().await {
                Ok(()) => Ok(Claim::Taken),
                Err(e) if is_conflict(&e) => Ok(Claim::Vanished),
                Err(e) => Err(QueueError::Backend(format!("Failed to commit: {}", e))),
            },
            Ok(_) => {
                tx.rollback()
                    .await
                    .map_err(|e| QueueError::Backend(format!("Failed to rollback: {}", e)))?;
                Ok(Claim::Vanished)
            }
            Err(e) if is_conflict(&e) => {
                tx.rollback()
                    .await
                    .map_err(|e| QueueError::Backend(format!("Failed to rollback: {}", e)))?;
                Ok(Claim::Vanished)
            }
            Err(e) => Err(QueueError::Backend(format!("Failed to delete job: {}", e))),
        }
    }

    /// Delete every record matching `predicate` and return how many were
    /// removed.
    ///
    /// All deletions of one pass share a transaction. If any selected row has
    /// vanished the pass is rolled back and the scan starts over, so the
    /// returned count only covers rows this call actually deleted.
    pub async fn remove(&self, predicate: Predicate<'_>) -> Result<usize> {
        'scan: loop {
            let rows: Vec<(i64, Vec<u8>)> = sqlx::query_as(&format!(
                "SELECT id, message FROM {} ORDER BY id",
                self.table
            ))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| QueueError::Backend(format!("Failed to scan jobs: {}", e)))?;

            let mut matching = Vec::new();
            for (id, message) in rows {
                if predicate(&decode_bytes(&message)?) {
                    matching.push(id);
                }
            }
            if matching.is_empty() {
                return Ok(0);
            }

            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| QueueError::Backend(format!("Failed to begin transaction: {}", e)))?;

            for &id in &matching {
                let deleted = sqlx::query(&format!("DELETE FROM {} WHERE id = ?", self.table))
                    .bind(id)
                    .execute(&mut *tx)
                    .await;

                match deleted {
                    Ok(done) if done.rows_affected() > 0 => {}
                    Ok(_) => {
                        tx.rollback().await.map_err(|e| {
                            QueueError::Backend(format!("Failed to rollback: {}", e))
                        })?;
                        tracing::trace!(table = %self.table, id, "Row vanished, restarting remove");
                        continue 'scan;
                    }
                    Err(e) if is_conflict(&e) => {
                        tx.rollback().await.map_err(|e| {
                            QueueError::Backend(format!("Failed to rollback: {}", e))
                        })?;
                        continue 'scan;
                    }
                    Err(e) => {
                        return Err(QueueError::Backend(format!("Failed to delete job: {}", e)))
                    }
                }
            }

            match tx.commit().await {
                Ok(()) => {}
                Err(e) if is_conflict(&e) => continue 'scan,
                Err(e) => return Err(QueueError::Backend(format!("Failed to commit: {}", e))),
            }

            tracing::debug!(table = %self.table, removed = matching.len(), "Jobs removed");
            return Ok(matching.len());
        }
    }

    /// Delete every record.
    pub async fn clear(&self) -> Result<()> {
        sqlx::query(&format!("DELETE FROM {}", self.table))
            .execute(&self.pool)
            .await
            .map_err(|e| QueueError::Backend(format!("Failed to clear queue: {}", e)))?;

        tracing::debug!(table = %self.table, "Queue cleared");
        Ok(())
    }

    /// Get the number of queued records.
    pub async fn count(&self) -> Result<usize> {
        let row: (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {}", self.table))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| QueueError::Backend(format!("Failed to count jobs: {}", e)))?;
        Ok(row.0 as usize)
    }

    /// Snapshot of all records with their priorities, highest first.
    pub async fn list(&self) -> Result<Vec<(JobRecord, f64)>> {
        let rows: Vec<(Vec<u8>, f64)> = sqlx::query_as(&format!(
            "SELECT message, priority FROM {} ORDER BY priority DESC, id ASC",
            self.table
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| QueueError::Backend(format!("Failed to list jobs: {}", e)))?;

        rows.into_iter()
            .map(|(message, priority)| decode_bytes(&message).map(|record| (record, priority)))
            .collect()
    }
}

/// [`SpiderQueue`] over a per-project SQLite database.
#[derive(Clone, Debug)]
pub struct SqliteSpiderQueue {
    queue: SqlitePriorityQueue,
}

impl SqliteSpiderQueue {
    /// Open the queue described by `config`.
    ///
    /// With `dbs_dir` set the queue lives in `<dbs_dir>/<project>.db`,
    /// otherwise in memory.
    pub async fn new(config: &QueueConfig) -> Result<Self> {
        config.validate()?;
        if let Some(dir) = &config.dbs_dir {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                QueueError::Connection(format!("Failed to create {}: {}", dir.display(), e))
            })?;
        }
        let queue = SqlitePriorityQueue::new(&config.sqlite_url(), &config.table).await?;
        Ok(Self { queue })
    }

    /// Wrap an already opened queue.
    pub fn with_queue(queue: SqlitePriorityQueue) -> Self {
        Self { queue }
    }

    /// Get the underlying priority queue.
    pub fn queue(&self) -> &SqlitePriorityQueue {
        &self.queue
    }
}

#[async_trait]
impl SpiderQueue for SqliteSpiderQueue {
    async fn add(&self, name: &str, priority: f64, args: Map<String, Value>) -> Result<()> {
        self.queue
            .put(&JobRecord::with_args(name, args), priority)
            .await
    }

    async fn pop(&self) -> Result<Option<JobRecord>> {
        self.queue.pop().await
    }

    async fn count(&self) -> Result<usize> {
        self.queue.count().await
    }

    async fn list(&self) -> Result<Vec<(JobRecord, f64)>> {
        self.queue.list().await
    }

    async fn remove(&self, predicate: Predicate<'_>) -> Result<usize> {
        self.queue.remove(predicate).await
    }

    async fn clear(&self) -> Result<()> {
        self.queue.clear().await
    }

    async fn add_record(&self, record: JobRecord, priority: f64) -> Result<()> {
        self.queue.put(&record, priority).await
    }
}
