//! Advisory distributed lock over the store's conditional-set primitive.
//!
//! One lock key exists per queue list (`<list>-lock`). Acquisition polls a
//! set-if-absent with a TTL until it wins; release deletes the key. The TTL
//! is a crash-safety net: a holder that dies without releasing stops
//! blocking the fleet once the key expires. That trades strict mutual
//! exclusion for availability, which the protocol accepts.
//!
//! The lock guards queue-list mutation only. Job bodies always execute
//! outside the critical section, so one job's runtime never serializes the
//! other workers.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::store::{ListStore, StoreError};

/// Sentinel value stored under the lock key.
const LOCK_SENTINEL: &str = "locked";

/// Polling mutual-exclusion primitive keyed by list name.
#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn ListStore>,
    ttl: Duration,
    poll_interval: Duration,
}

impl LockManager {
    /// Creates a lock manager over `store`.
    pub fn new(store: Arc<dyn ListStore>, ttl: Duration, poll_interval: Duration) -> Self {
        Self {
            store,
            ttl,
            poll_interval,
        }
    }

    fn lock_key(list: &str) -> String {
        format!("{list}-lock")
    }

    /// Acquires the lock for `list`, blocking until it is won.
    ///
    /// Retries on a fixed poll interval for as long as another holder owns
    /// the key. Store errors propagate to the caller; contention does not.
    pub async fn acquire(&self, list: &str) -> Result<(), StoreError> {
        let key = Self::lock_key(list);
        loop {
            if self
                .store
                .set_if_absent(&key, LOCK_SENTINEL, self.ttl)
                .await?
            {
                debug!(lock = %key, "acquired lock");
                return Ok(());
            }
            debug!(lock = %key, "lock held elsewhere, retrying");
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Releases the lock for `list`.
    ///
    /// Idempotent: releasing an already-expired or never-held lock is a
    /// no-op.
    pub async fn release(&self, list: &str) -> Result<(), StoreError> {
        self.store.delete(&Self::lock_key(list)).await?;
        debug!(lock = %Self::lock_key(list), "released lock");
        Ok(())
    }
}
