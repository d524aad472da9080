//! Submission side of the queue.

use std::sync::Arc;

use tracing::info;

use crate::config::QueueConfig;
use crate::job::JobRecord;
use crate::store::{ListOp, ListStore, StoreError};

/// Appends newly submitted job records to the tail of the pending list.
///
/// A single append is atomic at the store level, so the producer never
/// takes a lock and never blocks on job execution.
pub struct Producer {
    store: Arc<dyn ListStore>,
    pending_list: String,
    max_attempts: u32,
}

impl Producer {
    /// Creates a producer over `store` using the queue names and claim
    /// budget from `config`.
    pub fn new(store: Arc<dyn ListStore>, config: &QueueConfig) -> Self {
        Self {
            store,
            pending_list: config.pending_list.clone(),
            max_attempts: config.max_attempts,
        }
    }

    /// Submits one job and returns the created record.
    pub async fn enqueue(
        &self,
        name: impl Into<String>,
        payload: serde_json::Value,
    ) -> Result<JobRecord, StoreError> {
        let job = JobRecord::new(name, payload).with_max_attempts(self.max_attempts);
        self.store.append(&self.pending_list, &job).await?;
        info!(job_id = %job.id, name = %job.name, "enqueued job");
        Ok(job)
    }

    /// Submits several jobs in one atomic batch.
    pub async fn enqueue_batch(
        &self,
        jobs: Vec<(String, serde_json::Value)>,
    ) -> Result<Vec<JobRecord>, StoreError> {
        if jobs.is_empty() {
            return Ok(Vec::new());
        }

        let records: Vec<JobRecord> = jobs
            .into_iter()
            .map(|(name, payload)| {
                JobRecord::new(name, payload).with_max_attempts(self.max_attempts)
            })
            .collect();

        let ops: Vec<ListOp> = records
            .iter()
            .map(|record| ListOp::Append {
                list: self.pending_list.clone(),
                record: record.clone(),
            })
            .collect();

        self.store.transaction(&ops).await?;
        info!(count = records.len(), "enqueued job batch");
        Ok(records)
    }
}
