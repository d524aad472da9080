//! Redis backend for the list store contract.
//!
//! Lists follow the LPUSH/RPOP orientation: the tail of a queue is the left
//! end of the Redis list and the head is the right end, so `RPOPLPUSH`
//! implements the head-to-tail move between lists in one atomic command.
//! Transactions are MULTI/EXEC batches via `redis::pipe().atomic()`.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::job::JobRecord;
use crate::store::{ListOp, ListStore, StoreError};

/// Redis-backed [`ListStore`] over a reconnecting connection manager.
#[derive(Clone)]
pub struct RedisListStore {
    redis: ConnectionManager,
}

impl RedisListStore {
    /// Connects to Redis.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::ConnectionFailed` if the connection fails.
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        Ok(Self { redis })
    }

    /// Creates a store from an existing connection manager.
    ///
    /// Useful when sharing a connection across multiple components.
    pub fn from_connection(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    fn encode(record: &JobRecord) -> Result<String, StoreError> {
        Ok(serde_json::to_string(record)?)
    }

    fn decode(data: &str) -> Result<JobRecord, StoreError> {
        Ok(serde_json::from_str(data)?)
    }
}

#[async_trait]
impl ListStore for RedisListStore {
    async fn append(&self, list: &str, record: &JobRecord) -> Result<(), StoreError> {
        let serialized = Self::encode(record)?;
        let mut conn = self.redis.clone();
        conn.lpush::<_, _, ()>(list, serialized).await?;
        Ok(())
    }

    async fn peek_head(&self, list: &str) -> Result<Option<JobRecord>, StoreError> {
        let mut conn = self.redis.clone();
        let data: Option<String> = conn.lindex(list, -1).await?;
        match data {
            Some(data) => Ok(Some(Self::decode(&data)?)),
            None => Ok(None),
        }
    }

    async fn transaction(&self, ops: &[ListOp]) -> Result<(), StoreError> {
        if ops.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        pipe.atomic();

        for op in ops {
            match op {
                ListOp::Append { list, record } => {
                    pipe.lpush(list, Self::encode(record)?);
                }
                ListOp::ReplaceHead { list, record } => {
                    // Head sits at the right end; LSET fails the whole
                    // batch if the list is empty.
                    pipe.cmd("LSET").arg(list).arg(-1).arg(Self::encode(record)?);
                }
                ListOp::MoveHeadToTail { src, dst } => {
                    pipe.cmd("RPOPLPUSH").arg(src).arg(dst);
                }
                ListOp::RemoveFirstMatching { list, record } => {
                    pipe.lrem(list, -1, Self::encode(record)?);
                }
                ListOp::PopHead { list } => {
                    pipe.cmd("RPOP").arg(list);
                }
            }
        }

        let mut conn = self.redis.clone();
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn remove_first_matching(
        &self,
        list: &str,
        record: &JobRecord,
    ) -> Result<(), StoreError> {
        let serialized = Self::encode(record)?;
        let mut conn = self.redis.clone();
        // Negative count scans from the head end.
        conn.lrem::<_, _, ()>(list, -1, serialized).await?;
        Ok(())
    }

    async fn pop_head(&self, list: &str) -> Result<Option<JobRecord>, StoreError> {
        let mut conn = self.redis.clone();
        let data: Option<String> = conn.rpop(list, None).await?;
        match data {
            Some(data) => Ok(Some(Self::decode(&data)?)),
            None => Ok(None),
        }
    }

    async fn len(&self, list: &str) -> Result<usize, StoreError> {
        let mut conn = self.redis.clone();
        let len: usize = conn.llen(list).await?;
        Ok(len)
    }

    async fn list_all(&self, list: &str) -> Result<Vec<JobRecord>, StoreError> {
        let mut conn = self.redis.clone();
        let entries: Vec<String> = conn.lrange(list, 0, -1).await?;
        // LRANGE walks tail to head in this orientation; reverse so the
        // head comes first.
        entries
            .iter()
            .rev()
            .map(|data| Self::decode(data))
            .collect()
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut conn = self.redis.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }
}
