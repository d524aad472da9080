//! Staleness-based retry sweep.
//!
//! The sweeper repairs the gap the claim protocol cannot close: a worker
//! can crash after claiming a job but before resolving it. On each period
//! it inspects the head of the in-flight list under that list's lock and
//! either leaves it (fresh), requeues it (stale with budget left), or
//! discards it (stale and exhausted).
//!
//! State machine continuation:
//!
//! ```text
//! InFlight --(stale, attempts < max)--> Pending
//! InFlight --(stale, attempts >= max)--> Dead
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::lock::LockManager;
use crate::pool::SharedPoolStats;
use crate::store::{ListOp, ListStore, StoreError};

/// Result of one sweep cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    /// The in-flight list was empty.
    Empty,
    /// The head claim is younger than the staleness threshold.
    Fresh,
    /// A stale job was moved back to the pending tail.
    Requeued(Uuid),
    /// A stale, exhausted job was permanently discarded.
    Discarded(Uuid),
}

/// Reclaims stale in-flight jobs on a fixed period.
pub struct RetrySweeper {
    store: Arc<dyn ListStore>,
    locks: LockManager,
    pending_list: String,
    in_flight_list: String,
    sweep_interval: Duration,
    stale_threshold: Duration,
    stats: Arc<SharedPoolStats>,
}

impl RetrySweeper {
    /// Creates a sweeper over `store`.
    pub fn new(
        store: Arc<dyn ListStore>,
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
            pending_list: config.pending_list.clone(),
            in_flight_list: config.in_flight_list.clone(),
            sweep_interval: config.sweep_interval,
            stale_threshold: config.stale_threshold,
            stats,
        }
    }

    /// Sweep loop. Overlapping sweeps across workers are prevented by the
    /// in-flight lock itself, so a single task per instance suffices.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        info!("retry sweeper started");

        let mut ticker = tokio::time::interval(self.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("retry sweeper received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        error!(error = %e, "sweep cycle failed");
                    }
                }
            }
        }

        info!("retry sweeper stopped");
    }

    /// Runs one sweep cycle over the in-flight head.
    ///
    /// Public so embedders and tests can drive the protocol directly.
    pub async fn sweep(&self) -> Result<SweepOutcome, StoreError> {
        self.locks.acquire(&self.in_flight_list).await?;
        let result = self.sweep_head_locked().await;
        let release = self.locks.release(&self.in_flight_list).await;
        let outcome = result?;
        release?;
        Ok(outcome)
    }

    /// Judges the in-flight head. Caller holds the in-flight lock.
    async fn sweep_head_locked(&self) -> Result<SweepOutcome, StoreError> {
        let Some(job) = self.store.peek_head(&self.in_flight_list).await? else {
            return Ok(SweepOutcome::Empty);
        };

        if !job.is_stale(Utc::now(), self.stale_threshold) {
            // Still being legitimately processed, or too young to judge.
            debug!(job_id = %job.id, "in-flight head is fresh");
            return Ok(SweepOutcome::Fresh);
        }

        if job.should_retry() {
            let mut requeued = job.clone();
            requeued.claimed_at = None;

            self.store
                .transaction(&[
                    ListOp::ReplaceHead {
                        list: self.in_flight_list.clone(),
                        record: requeued.clone(),
                    },
                    ListOp::MoveHeadToTail {
                        src: self.in_flight_list.clone(),
                        dst: self.pending_list.clone(),
                    },
                ])
                .await?;

            warn!(
                job_id = %job.id,
                name = %job.name,
                attempts = job.attempts,
                remaining = job.remaining_attempts(),
                "requeued stale job for another attempt"
            );
            Ok(SweepOutcome::Requeued(job.id))
        } else {
            self.store.pop_head(&self.in_flight_list).await?;
            self.stats.record_discard();
            // Terminal, by-design data loss; keep it loud.
            error!(
                job_id = %job.id,
                name = %job.name,
                attempts = job.attempts,
                "discarding job after exhausting its claim budget"
            );
            Ok(SweepOutcome::Discarded(job.id))
        }
    }
}
