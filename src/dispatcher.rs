//! Concurrency-gated dispatch loop.
//!
//! Each tick claims the head of the pending list under that list's lock,
//! moves it to the in-flight list in one store transaction, releases the
//! lock, and only then executes the job body. Success retires the record
//! from in-flight; failure leaves it there for the retry sweeper.
//!
//! The per-job state machine, with these the only legal transitions:
//!
//! ```text
//! Pending --(claim)--> InFlight --(success)--> Done
//!                      InFlight --(failure)--> InFlight   (sweeper's turf)
//! ```
//!
//! Transitions happen exclusively through the transactional move primitive,
//! so no intermediate state is ever observable from another worker.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, Semaphore};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::handler::JobHandler;
use crate::job::JobRecord;
use crate::lock::LockManager;
use crate::pool::SharedPoolStats;
use crate::store::{ListOp, ListStore, StoreError};

/// Result of one dispatch cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The pending list was empty.
    Idle,
    /// A job was claimed, executed, and retired.
    Completed(Uuid),
    /// A job was claimed and executed but failed; it stays in-flight.
    Failed(Uuid),
}

/// Claims jobs off the pending list and drives them through execution.
pub struct Dispatcher {
    store: Arc<dyn ListStore>,
    locks: LockManager,
    handler: Arc<dyn JobHandler>,
    pending_list: String,
    in_flight_list: String,
    dispatch_interval: std::time::Duration,
    permits: Arc<Semaphore>,
    stats: Arc<SharedPoolStats>,
}

impl Dispatcher {
    /// Creates a dispatcher over `store` executing jobs with `handler`.
    pub fn new(
        store: Arc<dyn ListStore>,
        handler: Arc<dyn JobHandler>,
        config: &QueueConfig,
        stats: Arc<SharedPoolStats>,
    ) -> Self {
        let locks = LockManager::new(
            Arc::clone(&store),
            config.lock_ttl,
            config.lock_poll_interval,
        );
        Self {
            store,
            locks,
            handler,
            pending_list: config.pending_list.clone(),
            in_flight_list: config.in_flight_list.clone(),
            dispatch_interval: config.dispatch_interval,
            permits: Arc::new(Semaphore::new(config.max_concurrency)),
            stats,
        }
    }

    /// Poll loop: one claim cycle per tick, gated by the execution permits.
    ///
    /// Cycle errors are logged at the tick boundary and retried on the next
    /// tick; nothing here is fatal to the loop.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        info!("dispatcher started");

        let mut ticker = tokio::time::interval(self.dispatch_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("dispatcher received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    let permit = match Arc::clone(&self.permits).try_acquire_owned() {
                        Ok(permit) => permit,
                        Err(_) => {
                            debug!("all execution slots busy, skipping tick");
                            continue;
                        }
                    };

                    let dispatcher = Arc::clone(&self);
                    tokio::spawn(async move {
                        // Held for the whole cycle; dropping it on any exit
                        // path frees the slot.
                        let _permit = permit;
                        if let Err(e) = dispatcher.tick().await {
                            error!(error = %e, "dispatch cycle failed");
                        }
                    });
                }
            }
        }

        info!("dispatcher stopped");
    }

    /// Runs one full claim-execute-resolve cycle.
    ///
    /// Public so embedders and tests can drive the protocol without the
    /// poll loop. Does not consult the execution permits.
    pub async fn tick(&self) -> Result<DispatchOutcome, StoreError> {
        let Some(job) = self.claim_next().await? else {
            return Ok(DispatchOutcome::Idle);
        };

        // Execution happens outside any lock so one job's runtime never
        // serializes the other workers.
        self.stats.incr_executing();
        let outcome = self.handler.execute(&job).await;
        self.stats.decr_executing();

        match outcome {
            Ok(()) => {
                self.retire(&job).await?;
                self.stats.record_success();
                info!(job_id = %job.id, name = %job.name, attempt = job.attempts, "job completed");
                Ok(DispatchOutcome::Completed(job.id))
            }
            Err(e) => {
                // Leave the record in-flight untouched; the sweeper will
                // requeue or discard it once the claim goes stale.
                self.stats.record_failure();
                warn!(
                    job_id = %job.id,
                    name = %job.name,
                    attempt = job.attempts,
                    remaining = job.remaining_attempts(),
                    error = %e,
                    "job execution failed, leaving record for the sweeper"
                );
                Ok(DispatchOutcome::Failed(job.id))
            }
        }
    }

    /// Claims the head of the pending list, if any.
    async fn claim_next(&self) -> Result<Option<JobRecord>, StoreError> {
        self.locks.acquire(&self.pending_list).await?;
        let result = self.claim_head_locked().await;
        let release = self.locks.release(&self.pending_list).await;
        let claimed = result?;
        release?;
        Ok(claimed)
    }

    /// Stamps and moves the pending head. Caller holds the pending lock.
    async fn claim_head_locked(&self) -> Result<Option<JobRecord>, StoreError> {
        let Some(mut job) = self.store.peek_head(&self.pending_list).await? else {
            return Ok(None);
        };

        job.stamp_claim(Utc::now());

        // The stamped write-back and the list move must be one transaction:
        // a crash between them would duplicate or drop the job.
        self.store
            .transaction(&[
                ListOp::ReplaceHead {
                    list: self.pending_list.clone(),
                    record: job.clone(),
                },
                ListOp::MoveHeadToTail {
                    src: self.pending_list.clone(),
                    dst: self.in_flight_list.clone(),
                },
            ])
            .await?;

        debug!(job_id = %job.id, attempt = job.attempts, "claimed job");
        Ok(Some(job))
    }

    /// Removes a successfully executed record from the in-flight list.
    async fn retire(&self, job: &JobRecord) -> Result<(), StoreError> {
        self.locks.acquire(&self.in_flight_list).await?;
        let result = self
            .store
            .remove_first_matching(&self.in_flight_list, job)
            .await;
        let release = self.locks.release(&self.in_flight_list).await;
        result?;
        release?;
        Ok(())
    }
}
