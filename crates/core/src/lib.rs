//! # spiderq-core - Core types and traits for persistent job queues
//!
//! This crate provides the abstractions shared by every spiderq backend:
//! - `JobRecord` and the JSON codec used to store it
//! - `SpiderQueue` trait implemented by each storage backend
//! - `KeyValueStore` trait for auxiliary bookkeeping
//! - `QueueConfig` for choosing and addressing a backend
//! - Error types

mod config;
mod error;
mod queue;
pub mod record;
mod store;

// Re-export main types
pub use config::{
    BackendKind, QueueConfig, QueueConfigBuilder, DEFAULT_HOST, DEFAULT_NAMESPACE, DEFAULT_PORT,
    DEFAULT_PROJECT, DEFAULT_TABLE,
};
pub use error::{QueueError, Result};
pub use queue::{check_priority, DynQueue, Predicate, SharedQueue, SpiderQueue};
pub use record::{decode, encode, JobRecord};
pub use store::KeyValueStore;
