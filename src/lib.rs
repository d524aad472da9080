//! conveyor: a self-coordinating job queue on a shared Redis store.
//!
//! Multiple independent worker processes pull jobs from a shared pair of
//! lists without losing work across crashes or restarts. The machinery:
//!
//! - **Two-list hand-off**: jobs wait in `pending` and move to `in-flight`
//!   on claim, through a single store transaction, so a job is always in
//!   exactly one list.
//! - **Advisory locks**: a conditional-set-with-expiry key per list
//!   serializes list mutation; job bodies execute outside the lock.
//! - **Retry sweep**: claims older than a staleness threshold are requeued
//!   until their attempt budget runs out, then discarded.
//! - **Bounded dispatch**: a semaphore caps concurrently executing job
//!   bodies per worker instance.
//!
//! Delivery is at-least-once with bounded retries; there is no exactly-once
//! guarantee.
//!
//! # Example
//!
//! ```rust,ignore
//! use conveyor::{CommandHandler, Producer, QueueConfig, QueuePool, RedisListStore};
//! use std::sync::Arc;
//!
//! let config = QueueConfig::from_env()?;
//! let store = Arc::new(RedisListStore::connect(&config.redis_url).await?);
//!
//! let producer = Producer::new(store.clone(), &config);
//! producer.enqueue("thumbnail", serde_json::json!({"path": "/img/a.png"})).await?;
//!
//! let handler = Arc::new(CommandHandler::new(config.job_timeout));
//! let mut pool = QueuePool::new(config, store, handler)?;
//! pool.start()?;
//! // ...
//! pool.shutdown().await?;
//! ```

pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod handler;
pub mod job;
pub mod lock;
pub mod memory_store;
pub mod pool;
pub mod producer;
pub mod redis_store;
pub mod store;
pub mod sweeper;

pub use config::{ConfigError, QueueConfig};
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use handler::{CommandHandler, JobHandler};
pub use job::JobRecord;
pub use lock::LockManager;
pub use memory_store::MemoryListStore;
pub use pool::{PoolError, PoolStats, QueuePool, SharedPoolStats};
pub use producer::Producer;
pub use redis_store::RedisListStore;
pub use store::{ListOp, ListStore, StoreError};
pub use sweeper::{RetrySweeper, SweepOutcome};
