//! List store contract.
//!
//! The queue protocol needs a small set of ordered-list primitives plus a
//! conditional-set-with-expiry for locks and a multi-operation transaction.
//! Any store offering these satisfies the contract; [`crate::redis_store`]
//! is the production backend, [`crate::memory_store`] the in-process
//! stand-in for tests and single-process deployments.
//!
//! # Transactions
//!
//! The claim and reclaim protocols overwrite the head of a list and then
//! move it to the other list. Those two operations must land in a single
//! [`ListStore::transaction`] call: a crash between them would leave either
//! a corrupted duplicate or a silently dropped job. This is a required
//! invariant of the protocol, not an optimization.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::job::JobRecord;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failed to connect to the backing store.
    #[error("store connection failed: {0}")]
    ConnectionFailed(String),

    /// Redis operation failed.
    #[error("Redis operation failed: {0}")]
    Redis(#[from] redis::RedisError),

    /// Failed to serialize or deserialize a job record.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An operation required a head entry but the list was empty.
    #[error("list '{0}' is empty")]
    EmptyList(String),
}

/// A single mutation inside a [`ListStore::transaction`] batch.
#[derive(Debug, Clone)]
pub enum ListOp {
    /// Push a record to the tail of `list`.
    Append { list: String, record: JobRecord },
    /// Overwrite the entry currently at the head of `list`.
    ///
    /// The caller must have established via `peek_head` that a head exists,
    /// and must hold the list's lock for the peek-replace window.
    ReplaceHead { list: String, record: JobRecord },
    /// Pop the head of `src` and push it to the tail of `dst`.
    MoveHeadToTail { src: String, dst: String },
    /// Delete the first occurrence equal to `record` from `list`.
    RemoveFirstMatching { list: String, record: JobRecord },
    /// Remove and discard the head of `list`.
    PopHead { list: String },
}

/// Ordered-list store with lock and transaction support.
///
/// Head is the oldest entry of a list, tail the newest. A bare `append` is
/// atomic on its own; everything that reads and then writes must go through
/// `transaction` under the list's lock.
#[async_trait]
pub trait ListStore: Send + Sync {
    /// Pushes `record` to the tail of `list`.
    async fn append(&self, list: &str, record: &JobRecord) -> Result<(), StoreError>;

    /// Reads the head of `list` without mutating it.
    async fn peek_head(&self, list: &str) -> Result<Option<JobRecord>, StoreError>;

    /// Executes a batch of operations atomically: either all apply or none.
    async fn transaction(&self, ops: &[ListOp]) -> Result<(), StoreError>;

    /// Deletes the first occurrence equal to `record` from `list`.
    ///
    /// A record that is no longer present is not an error; it may already
    /// have been retired or reclaimed by another worker.
    async fn remove_first_matching(&self, list: &str, record: &JobRecord)
        -> Result<(), StoreError>;

    /// Removes and returns the head of `list`, or `None` if empty.
    async fn pop_head(&self, list: &str) -> Result<Option<JobRecord>, StoreError>;

    /// Returns the number of entries in `list`.
    async fn len(&self, list: &str) -> Result<usize, StoreError>;

    /// Returns every entry of `list`, head first.
    async fn list_all(&self, list: &str) -> Result<Vec<JobRecord>, StoreError>;

    /// Sets `key` to `value` with `ttl` only if the key is absent.
    ///
    /// Returns `true` if the key was set, `false` if it already existed.
    /// This is the primitive the lock manager is built from.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration)
        -> Result<bool, StoreError>;

    /// Unconditionally deletes `key` (a plain key or a whole list).
    /// Deleting an absent key is a no-op.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}
