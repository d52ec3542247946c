//! Configuration types for opening a queue.

use std::path::PathBuf;

use crate::error::{QueueError, Result};

/// Default Redis host.
pub const DEFAULT_HOST: &str = "localhost";
/// Default Redis port.
pub const DEFAULT_PORT: u16 = 6379;
/// Default project name.
pub const DEFAULT_PROJECT: &str = "default";
/// Default queue table name.
pub const DEFAULT_TABLE: &str = "spider_queue";
/// Default key namespace for remote queues.
pub const DEFAULT_NAMESPACE: &str = "spiderq.queue";

/// Which storage engine backs a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// Embedded SQLite file (or in-memory database).
    #[default]
    Sqlite,
    /// Remote Redis sorted set.
    Redis,
}

impl std::str::FromStr for BackendKind {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "redis" => Ok(Self::Redis),
            other => Err(QueueError::Config(format!("unknown backend: {}", other))),
        }
    }
}

/// Configuration for a queue instance.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Storage engine.
    pub backend: BackendKind,
    /// Redis host.
    pub host: String,
    /// Redis port.
    pub port: u16,
    /// Project the queue belongs to.
    pub project: String,
    /// Queue table (SQLite) or key suffix (Redis).
    pub table: String,
    /// Key namespace prefix for Redis.
    pub namespace: String,
    /// Directory holding one SQLite file per project. `None` keeps the queue
    /// in memory.
    pub dbs_dir: Option<PathBuf>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            project: DEFAULT_PROJECT.to_string(),
            table: DEFAULT_TABLE.to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            dbs_dir: None,
        }
    }
}

impl QueueConfig {
    /// Create a new builder.
    pub fn builder() -> QueueConfigBuilder {
        QueueConfigBuilder::new()
    }

    /// Connection URL for the Redis backend.
    pub fn redis_url(&self) -> String {
        format!("redis://{}:{}/", self.host, self.port)
    }

    /// Connection URL for the SQLite backend.
    pub fn sqlite_url(&self) -> String {
        match &self.dbs_dir {
            Some(dir) => format!("sqlite:{}", dir.join(format!("{}.db", self.project)).display()),
            None => "sqlite::memory:".to_string(),
        }
    }

    /// Check the fields that end up in table or key names.
    pub fn validate(&self) -> Result<()> {
        if self.project.is_empty() {
            return Err(QueueError::Config("project must not be empty".to_string()));
        }
        if self.table.is_empty()
            || !self
                .table
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(QueueError::Config(format!(
                "table must be a non-empty identifier of [A-Za-z0-9_]: {:?}",
                self.table
            )));
        }
        Ok(())
    }
}

/// Builder for QueueConfig.
#[derive(Debug, Default)]
pub struct QueueConfigBuilder {
    config: QueueConfig,
}

impl QueueConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the storage engine.
    pub fn backend(mut self, backend: BackendKind) -> Self {
        self.config.backend = backend;
        self
    }

    /// Set the Redis host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Set the Redis port.
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Set the project.
    pub fn project(mut self, project: impl Into<String>) -> Self {
        self.config.project = project.into();
        self
    }

    /// Set the queue table.
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.config.table = table.into();
        self
    }

    /// Set the Redis key namespace.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.config.namespace = namespace.into();
        self
    }

    /// Set the directory for SQLite files.
    pub fn dbs_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.dbs_dir = Some(dir.into());
        self
    }

    /// Build the QueueConfig.
    pub fn build(self) -> QueueConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_config_default() {
        let config = QueueConfig::default();
        assert_eq!(config.backend, BackendKind::Sqlite);
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 6379);
        assert_eq!(config.project, "default");
        assert_eq!(config.table, "spider_queue");
        assert_eq!(config.namespace, "spiderq.queue");
        assert!(config.dbs_dir.is_none());
    }

    #[test]
    fn test_queue_config_builder_fluent_chain() {
        let config = QueueConfig::builder()
            .backend(BackendKind::Redis)
            .host("redisdocker")
            .port(6380)
            .project("quotes")
            .table("queue")
            .namespace("scrapyd-redis.queue")
            .build();

        assert_eq!(config.backend, BackendKind::Redis);
        assert_eq!(config.host, "redisdocker");
        assert_eq!(config.port, 6380);
        assert_eq!(config.project, "quotes");
        assert_eq!(config.table, "queue");
        assert_eq!(config.namespace, "scrapyd-redis.queue");
    }

    #[test]
    fn test_redis_url() {
        let config = QueueConfig::builder().host("10.0.0.5").port(7000).build();
        assert_eq!(config.redis_url(), "redis://10.0.0.5:7000/");
    }

    #[test]
    fn test_sqlite_url_in_memory() {
        assert_eq!(QueueConfig::default().sqlite_url(), "sqlite::memory:");
    }

    #[test]
    fn test_sqlite_url_per_project_file() {
        let config = QueueConfig::builder()
            .dbs_dir("/var/lib/spiderq")
            .project("quotes")
            .build();
        assert_eq!(config.sqlite_url(), "sqlite:/var/lib/spiderq/quotes.db");
    }

    #[test]
    fn test_backend_kind_from_str() {
        assert_eq!("sqlite".parse::<BackendKind>().unwrap(), BackendKind::Sqlite);
        assert_eq!("Redis".parse::<BackendKind>().unwrap(), BackendKind::Redis);
        assert!(matches!(
            "mongo".parse::<BackendKind>(),
            Err(QueueError::Config(_))
        ));
    }

    #[test]
    fn test_validate() {
        assert!(QueueConfig::default().validate().is_ok());
        assert!(QueueConfig::builder().project("").build().validate().is_err());
        assert!(QueueConfig::builder()
            .table("queue; DROP TABLE x")
            .build()
            .validate()
            .is_err());
        assert!(QueueConfig::builder().table("").build().validate().is_err());
    }

    #[test]
    fn test_queue_config_builder_debug() {
        let builder = QueueConfigBuilder::new();
        let debug = format!("{:?}", builder);
        assert!(debug.contains("QueueConfigBuilder"));
    }
}
