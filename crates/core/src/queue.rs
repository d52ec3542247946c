//! Queue abstraction shared by every storage backend.
//!
//! This module provides the trait the job-scheduling side talks to, so the
//! same code can run against the embedded SQLite queue or the Redis
//! sorted-set queue.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::error::{QueueError, Result};
use crate::record::JobRecord;

/// Predicate used by [`SpiderQueue::remove`] to select entries.
pub type Predicate<'a> = &'a (dyn Fn(&JobRecord) -> bool + Send + Sync);

/// Check that `priority` is a finite number.
///
/// NaN has no place in a priority ordering, and SQLite stores it as NULL.
pub fn check_priority(priority: f64) -> Result<()> {
    if priority.is_finite() {
        Ok(())
    } else {
        Err(QueueError::InvalidPriority(priority))
    }
}

/// A persistent priority queue of job records.
///
/// Higher priorities are popped first. Implementations must guarantee that
/// two concurrent `pop` calls, in this or any other process, never return the
/// same entry.
///
/// Backends differ in two places and callers must tolerate both:
///
/// - **Duplicate payloads.** The SQLite queue stores every `add` as its own
///   entry. The Redis queue keys entries by their encoded payload, so adding
///   an identical record again adds `priority` to the existing entry's score
///   instead of creating a second one.
/// - **`pop` returning `None`.** The SQLite queue returns `None` only when it
///   is empty. The Redis queue also returns `None` when another consumer
///   claimed the head entry first, so `None` means "nothing for you right
///   now", not "the queue is empty".
#[async_trait]
pub trait SpiderQueue: Send + Sync {
    /// Add a job named `name` with the given arguments.
    ///
    /// Fails with [`QueueError::InvalidPriority`] unless `priority` is finite.
    async fn add(&self, name: &str, priority: f64, args: Map<String, Value>) -> Result<()>;

    /// Remove and return the highest-priority job.
    async fn pop(&self) -> Result<Option<JobRecord>>;

    /// Get the number of entries. Advisory under concurrency.
    async fn count(&self) -> Result<usize>;

    /// Snapshot of every entry with its priority.
    ///
    /// Ordering is backend-specific: SQLite lists highest priority first,
    /// Redis lists by ascending score.
    async fn list(&self) -> Result<Vec<(JobRecord, f64)>>;

    /// Remove every entry matching `predicate`, returning how many were
    /// actually removed by this call.
    async fn remove(&self, predicate: Predicate<'_>) -> Result<usize>;

    /// Remove all entries. The queue remains usable afterwards.
    async fn clear(&self) -> Result<()>;

    /// Add a pre-built record.
    async fn add_record(&self, record: JobRecord, priority: f64) -> Result<()> {
        let (name, args) = record.into_parts();
        self.add(&name, priority, args).await
    }
}

/// A type-erased queue that can be shared across tasks.
pub type DynQueue = Arc<dyn SpiderQueue>;

/// Wrapper around `Arc<dyn SpiderQueue>` for convenience.
#[derive(Clone)]
pub struct SharedQueue {
    inner: DynQueue,
}

impl SharedQueue {
    /// Create a new SharedQueue from any SpiderQueue implementation.
    pub fn new<Q: SpiderQueue + 'static>(queue: Q) -> Self {
        Self {
            inner: Arc::new(queue),
        }
    }

    /// Get a reference to the inner queue.
    pub fn inner(&self) -> &DynQueue {
        &self.inner
    }
}

impl std::fmt::Debug for SharedQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedQueue").finish_non_exhaustive()
    }
}

#[async_trait]
impl SpiderQueue for SharedQueue {
    async fn add(&self, name: &str, priority: f64, args: Map<String, Value>) -> Result<()> {
        self.inner.add(name, priority, args).await
    }

    async fn pop(&self) -> Result<Option<JobRecord>> {
        self.inner.pop().await
    }

    async fn count(&self) -> Result<usize> {
        self.inner.count().await
    }

    async fn list(&self) -> Result<Vec<(JobRecord, f64)>> {
        self.inner.list().await
    }

    async fn remove(&self, predicate: Predicate<'_>) -> Result<usize> {
        self.inner.remove(predicate).await
    }

    async fn clear(&self) -> Result<()> {
        self.inner.clear().await
    }

    async fn add_record(&self, record: JobRecord, priority: f64) -> Result<()> {
        self.inner.add_record(record, priority).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Minimal in-process queue used to exercise the provided methods.
    #[derive(Default)]
    struct VecQueue {
        entries: Mutex<Vec<(JobRecord, f64)>>,
    }

    #[async_trait]
    impl SpiderQueue for VecQueue {
        async fn add(&self, name: &str, priority: f64, args: Map<String, Value>) -> Result<()> {
            let record = JobRecord::with_args(name, args);
            self.entries.lock().unwrap().push((record, priority));
            Ok(())
        }

        async fn pop(&self) -> Result<Option<JobRecord>> {
            let mut entries = self.entries.lock().unwrap();
            let best = entries
                .iter()
                .enumerate()
                .max_by(|a, b| a.1 .1.total_cmp(&b.1 .1).then(b.0.cmp(&a.0)))
                .map(|(i, _)| i);
            Ok(best.map(|i| entries.remove(i).0))
        }

        async fn count(&self) -> Result<usize> {
            Ok(self.entries.lock().unwrap().len())
        }

        async fn list(&self) -> Result<Vec<(JobRecord, f64)>> {
            Ok(self.entries.lock().unwrap().clone())
        }

        async fn remove(&self, predicate: Predicate<'_>) -> Result<usize> {
            let mut entries = self.entries.lock().unwrap();
            let before = entries.len();
            entries.retain(|(record, _)| !predicate(record));
            Ok(before - entries.len())
        }

        async fn clear(&self) -> Result<()> {
            self.entries.lock().unwrap().clear();
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_add_record_splits_name_and_args() {
        let queue = VecQueue::default();
        let record = JobRecord::new("fetch").arg("url", "a");
        queue.add_record(record.clone(), 2.0).await.unwrap();

        let listed = queue.list().await.unwrap();
        assert_eq!(listed, vec![(record, 2.0)]);
    }

    #[tokio::test]
    async fn test_shared_queue_delegates() {
        let shared = SharedQueue::new(VecQueue::default());
        let clone = shared.clone();

        shared
            .add_record(JobRecord::new("fetch").arg("url", "a"), 1.0)
            .await
            .unwrap();
        shared
            .add_record(JobRecord::new("fetch").arg("url", "b"), 5.0)
            .await
            .unwrap();
        assert_eq!(clone.count().await.unwrap(), 2);

        let first = clone.pop().await.unwrap().unwrap();
        assert_eq!(first.get("url"), Some(&Value::from("b")));

        let removed = shared.remove(&|job: &JobRecord| job.name() == "fetch").await.unwrap();
        assert_eq!(removed, 1);

        shared.add_record(JobRecord::new("parse"), 0.0).await.unwrap();
        shared.clear().await.unwrap();
        assert_eq!(shared.count().await.unwrap(), 0);
        assert!(shared.pop().await.unwrap().is_none());
    }

    #[test]
    fn test_check_priority() {
        assert!(check_priority(0.0).is_ok());
        assert!(check_priority(-3.5).is_ok());
        assert!(matches!(
            check_priority(f64::NAN),
            Err(QueueError::InvalidPriority(_))
        ));
        assert!(check_priority(f64::INFINITY).is_err());
        assert!(check_priority(f64::NEG_INFINITY).is_err());
    }

    #[test]
    fn test_shared_queue_debug() {
        let shared = SharedQueue::new(VecQueue::default());
        assert!(format!("{:?}", shared).contains("SharedQueue"));
    }
}
