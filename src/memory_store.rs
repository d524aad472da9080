//! In-process backend for the list store contract.
//!
//! Offers the same contract as the Redis backend from a single mutex-guarded
//! map, for single-process deployments and for exercising the queue protocol
//! in tests without a live store. Lock keys honor their TTL so crash-expiry
//! behavior can be tested too.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::job::JobRecord;
use crate::store::{ListOp, ListStore, StoreError};

#[derive(Default)]
struct Inner {
    lists: HashMap<String, VecDeque<JobRecord>>,
    keys: HashMap<String, (String, Instant)>,
}

impl Inner {
    fn purge_expired(&mut self) {
        let now = Instant::now();
        self.keys.retain(|_, (_, expires_at)| *expires_at > now);
    }
}

/// Mutex-guarded [`ListStore`] with the same semantics as the Redis backend.
///
/// Head is the front of each deque, tail the back. Transactions apply to a
/// scratch copy first, so a failing batch leaves no partial state behind.
#[derive(Default)]
pub struct MemoryListStore {
    inner: Mutex<Inner>,
}

impl MemoryListStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

fn apply(lists: &mut HashMap<String, VecDeque<JobRecord>>, op: &ListOp) -> Result<(), StoreError> {
    match op {
        ListOp::Append { list, record } => {
            lists.entry(list.clone()).or_default().push_back(record.clone());
        }
        ListOp::ReplaceHead { list, record } => {
            let head = lists
                .get_mut(list)
                .and_then(|entries| entries.front_mut())
                .ok_or_else(|| StoreError::EmptyList(list.clone()))?;
            *head = record.clone();
        }
        ListOp::MoveHeadToTail { src, dst } => {
            let moved = lists.get_mut(src).and_then(|entries| entries.pop_front());
            if let Some(record) = moved {
                lists.entry(dst.clone()).or_default().push_back(record);
            }
        }
        ListOp::RemoveFirstMatching { list, record } => {
            if let Some(entries) = lists.get_mut(list) {
                if let Some(pos) = entries.iter().position(|r| r == record) {
                    entries.remove(pos);
                }
            }
        }
        ListOp::PopHead { list } => {
            if let Some(entries) = lists.get_mut(list) {
                entries.pop_front();
            }
        }
    }
    Ok(())
}

#[async_trait]
impl ListStore for MemoryListStore {
    async fn append(&self, list: &str, record: &JobRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner
            .lists
            .entry(list.to_string())
            .or_default()
            .push_back(record.clone());
        Ok(())
    }

    async fn peek_head(&self, list: &str) -> Result<Option<JobRecord>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .lists
            .get(list)
            .and_then(|entries| entries.front())
            .cloned())
    }

    async fn transaction(&self, ops: &[ListOp]) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let mut scratch = inner.lists.clone();
        for op in ops {
            apply(&mut scratch, op)?;
        }
        inner.lists = scratch;
        Ok(())
    }

    async fn remove_first_matching(
        &self,
        list: &str,
        record: &JobRecord,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if let Some(entries) = inner.lists.get_mut(list) {
            if let Some(pos) = entries.iter().position(|r| r == record) {
                entries.remove(pos);
            }
        }
        Ok(())
    }

    async fn pop_head(&self, list: &str) -> Result<Option<JobRecord>, StoreError> {
        let mut inner = self.inner.lock().await;
        Ok(inner
            .lists
            .get_mut(list)
            .and_then(|entries| entries.pop_front()))
    }

    async fn len(&self, list: &str) -> Result<usize, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.lists.get(list).map_or(0, VecDeque::len))
    }

    async fn list_all(&self, list: &str) -> Result<Vec<JobRecord>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .lists
            .get(list)
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.purge_expired();
        if inner.keys.contains_key(key) {
            return Ok(false);
        }
        inner
            .keys
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.keys.remove(key);
        inner.lists.remove(key);
        Ok(())
    }
}
