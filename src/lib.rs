//! # spiderq - Persistent Priority Job Queue
//!
//! A Rust library for handing named jobs from a producer process to one or
//! more consumer processes through a durable priority queue.
//!
//! ## Features
//!
//! - **Two backends**: an embedded SQLite file or a remote Redis sorted set
//! - **Safe concurrent dequeue**: no two consumers ever receive the same entry
//! - **Priorities**: higher priority pops first
//! - **Administration**: count, list, selectively remove or clear a queue
//! - **Auxiliary mapping**: a JSON key-value store on Redis for bookkeeping
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use serde_json::{json, Map};
//! use spiderq::{BackendKind, QueueConfig, SpiderQueue};
//!
//! #[tokio::main]
//! async fn main() -> spiderq::Result<()> {
//!     let config = QueueConfig::builder()
//!         .backend(BackendKind::Sqlite)
//!         .dbs_dir("dbs")
//!         .project("quotes")
//!         .build();
//!     let queue = spiderq::connect(&config).await?;
//!
//!     let mut args = Map::new();
//!     args.insert("url".to_string(), json!("https://quotes.toscrape.com"));
//!     queue.add("fetch", 1.0, args).await?;
//!
//!     while let Some(job) = queue.pop().await? {
//!         println!("running {} with {:?}", job.name(), job.args());
//!     }
//!     Ok(())
//! }
//! ```

pub use spiderq_core::record;
pub use spiderq_core::{
    check_priority, decode, encode, BackendKind, DynQueue, JobRecord, KeyValueStore, Predicate,
    QueueConfig, QueueConfigBuilder, QueueError, Result, SharedQueue, SpiderQueue,
};
pub use spiderq_redis::{RedisDict, RedisKeys, RedisSpiderQueue, DEFAULT_DICT_TABLE};
pub use spiderq_sqlite::{SqlitePriorityQueue, SqliteSpiderQueue};

/// Open the queue described by `config` on the configured backend.
///
/// Connection failures are returned immediately and never retried.
pub async fn connect(config: &QueueConfig) -> Result<SharedQueue> {
    let queue = match config.backend {
        BackendKind::Sqlite => SharedQueue::new(SqliteSpiderQueue::new(config).await?),
        BackendKind::Redis => SharedQueue::new(RedisSpiderQueue::new(config).await?),
    };

    tracing::debug!(
        backend = ?config.backend,
        project = %config.project,
        table = %config.table,
        "Queue connected"
    );
    Ok(queue)
}

/// Open the auxiliary mapping for `database` on the configured Redis server.
pub async fn connect_dict(config: &QueueConfig, database: &str) -> Result<RedisDict> {
    RedisDict::new(config, database, DEFAULT_DICT_TABLE).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map, Value};

    fn args(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn file_config(dir: &tempfile::TempDir, project: &str) -> QueueConfig {
        QueueConfig::builder()
            .backend(BackendKind::Sqlite)
            .dbs_dir(dir.path())
            .project(project)
            .build()
    }

    #[tokio::test]
    async fn test_connect_pops_by_priority() {
        let queue = connect(&QueueConfig::default()).await.unwrap();

        queue
            .add("fetch", 1.0, args(&[("url", json!("a"))]))
            .await
            .unwrap();
        queue
            .add("fetch", 5.0, args(&[("url", json!("b"))]))
            .await
            .unwrap();

        let first = queue.pop().await.unwrap().unwrap();
        assert_eq!(first.get("url"), Some(&json!("b")));
        let second = queue.pop().await.unwrap().unwrap();
        assert_eq!(second.get("url"), Some(&json!("a")));
        assert!(queue.pop().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_producer_and_consumer_share_a_project_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = file_config(&dir, "quotes");

        let producer = connect(&config).await.unwrap();
        let consumer = connect(&config).await.unwrap();

        for (i, spider) in ["toscrape", "books", "authors"].iter().enumerate() {
            producer
                .add(spider, i as f64, args(&[("setting", json!(i))]))
                .await
                .unwrap();
        }
        assert_eq!(consumer.count().await.unwrap(), 3);

        let names: Vec<String> = consumer
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|(job, _)| job.name().to_string())
            .collect();
        assert_eq!(names, vec!["authors", "books", "toscrape"]);

        assert_eq!(consumer.pop().await.unwrap().unwrap().name(), "authors");
        assert_eq!(producer.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_projects_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let quotes = connect(&file_config(&dir, "quotes")).await.unwrap();
        let books = connect(&file_config(&dir, "books")).await.unwrap();

        quotes
            .add_record(JobRecord::new("toscrape"), 0.0)
            .await
            .unwrap();

        assert_eq!(quotes.count().await.unwrap(), 1);
        assert_eq!(books.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_remove_and_clear_through_shared_queue() {
        let queue = connect(&QueueConfig::default()).await.unwrap();

        for url in ["a", "b", "c"] {
            queue
                .add("fetch", 0.0, args(&[("url", json!(url))]))
                .await
                .unwrap();
        }
        queue.add("parse", 0.0, Map::new()).await.unwrap();

        let removed = queue
            .remove(&|job: &JobRecord| job.get("url") == Some(&json!("b")))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(queue.count().await.unwrap(), 3);

        queue.clear().await.unwrap();
        assert_eq!(queue.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reserved_name_argument_is_dropped() {
        let queue = connect(&QueueConfig::default()).await.unwrap();

        queue
            .add("fetch", 0.0, args(&[("name", json!("spoofed")), ("url", json!("a"))]))
            .await
            .unwrap();

        let job = queue.pop().await.unwrap().unwrap();
        assert_eq!(job.name(), "fetch");
        assert_eq!(job.args().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_table_is_rejected_before_connecting() {
        let config = QueueConfig::builder().table("spider queue").build();
        let err = connect(&config).await.unwrap_err();
        assert!(matches!(err, QueueError::Config(_)));
    }

    #[tokio::test]
    async fn test_nan_priority_is_rejected() {
        let queue = connect(&QueueConfig::default()).await.unwrap();
        let err = queue.add("fetch", f64::NAN, Map::new()).await.unwrap_err();
        assert!(matches!(err, QueueError::InvalidPriority(_)));
    }
}
