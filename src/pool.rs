//! Worker pool supervising the dispatch and sweep loops.
//!
//! A pool owns one dispatcher task and one sweeper task per worker
//! instance, wired to a shared shutdown channel. Concurrency within the
//! instance is bounded by the dispatcher's execution permits; a fleet of N
//! instances therefore executes up to N times `max_concurrency` jobs, a
//! known approximation rather than a globally enforced cap.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::{ConfigError, QueueConfig};
use crate::dispatcher::Dispatcher;
use crate::handler::JobHandler;
use crate::store::ListStore;
use crate::sweeper::RetrySweeper;

/// Errors that can occur in the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The configuration failed validation.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Pool is already running.
    #[error("pool is already running")]
    AlreadyRunning,

    /// Pool is not running.
    #[error("pool is not running")]
    NotRunning,

    /// Shutdown timed out.
    #[error("shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),
}

/// Point-in-time statistics snapshot.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Jobs executed to completion and retired.
    pub jobs_succeeded: u64,
    /// Executions that failed and were left for the sweeper.
    pub jobs_failed: u64,
    /// Jobs discarded by the sweeper after exhausting their budget.
    pub jobs_discarded: u64,
    /// Job bodies executing right now.
    pub executing: usize,
}

impl PoolStats {
    /// Returns the total number of finished executions.
    pub fn total_processed(&self) -> u64 {
        self.jobs_succeeded + self.jobs_failed
    }

    /// Returns the success rate as a percentage.
    pub fn success_rate(&self) -> f64 {
        let total = self.total_processed();
        if total == 0 {
            return 0.0;
        }
        (self.jobs_succeeded as f64 / total as f64) * 100.0
    }
}

/// Shared counters updated by the dispatcher and sweeper.
#[derive(Debug, Default)]
pub struct SharedPoolStats {
    succeeded: AtomicU64,
    failed: AtomicU64,
    discarded: AtomicU64,
    executing: AtomicU64,
}

impl SharedPoolStats {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_success(&self) {
        self.succeeded.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_discard(&self) {
        self.discarded.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn incr_executing(&self) {
        self.executing.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn decr_executing(&self) {
        self.executing.fetch_sub(1, Ordering::SeqCst);
    }

    /// Returns a point-in-time snapshot.
    pub fn snapshot(&self) -> PoolStats {
        PoolStats {
            jobs_succeeded: self.succeeded.load(Ordering::SeqCst),
            jobs_failed: self.failed.load(Ordering::SeqCst),
            jobs_discarded: self.discarded.load(Ordering::SeqCst),
            executing: self.executing.load(Ordering::SeqCst) as usize,
        }
    }
}

/// Supervisor for one worker instance's dispatch and sweep loops.
pub struct QueuePool {
    config: QueueConfig,
    store: Arc<dyn ListStore>,
    handler: Arc<dyn JobHandler>,
    shutdown_tx: broadcast::Sender<()>,
    handles: Vec<JoinHandle<()>>,
    stats: Arc<SharedPoolStats>,
    is_running: AtomicBool,
}

impl QueuePool {
    /// Creates a pool over `store`, executing job bodies with `handler`.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::Config` if the configuration is invalid.
    pub fn new(
        config: QueueConfig,
        store: Arc<dyn ListStore>,
        handler: Arc<dyn JobHandler>,
    ) -> Result<Self, PoolError> {
        config.validate()?;

        // Buffer of 1 is sufficient since shutdown is sent once.
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            store,
            handler,
            shutdown_tx,
            handles: Vec::new(),
            stats: Arc::new(SharedPoolStats::new()),
            is_running: AtomicBool::new(false),
        })
    }

    /// Spawns the dispatch and sweep loops.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::AlreadyRunning` if the pool is already running.
    pub fn start(&mut self) -> Result<(), PoolError> {
        if self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::AlreadyRunning);
        }

        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&self.store),
            Arc::clone(&self.handler),
            &self.config,
            Arc::clone(&self.stats),
        ));
        let sweeper = Arc::new(RetrySweeper::new(
            Arc::clone(&self.store),
            &self.config,
            Arc::clone(&self.stats),
        ));

        self.handles
            .push(tokio::spawn(dispatcher.run(self.shutdown_tx.subscribe())));
        self.handles
            .push(tokio::spawn(sweeper.run(self.shutdown_tx.subscribe())));

        self.is_running.store(true, Ordering::SeqCst);
        info!(
            max_concurrency = self.config.max_concurrency,
            "queue pool started"
        );

        Ok(())
    }

    /// Gracefully shuts down both loops.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::ShutdownTimeout` if the loops do not stop within
    /// the configured timeout.
    pub async fn shutdown(&mut self) -> Result<(), PoolError> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::NotRunning);
        }

        info!("initiating queue pool shutdown");

        // Ignore send error; the loops may have already stopped.
        let _ = self.shutdown_tx.send(());

        let shutdown_future = async {
            for handle in self.handles.drain(..) {
                if let Err(e) = handle.await {
                    error!(error = %e, "worker task panicked during shutdown");
                }
            }
        };

        match tokio::time::timeout(self.config.shutdown_timeout, shutdown_future).await {
            Ok(()) => {
                self.is_running.store(false, Ordering::SeqCst);
                info!("queue pool shutdown complete");
                Ok(())
            }
            Err(_) => {
                self.is_running.store(false, Ordering::SeqCst);
                Err(PoolError::ShutdownTimeout(self.config.shutdown_timeout))
            }
        }
    }

    /// Returns current pool statistics.
    pub fn stats(&self) -> PoolStats {
        self.stats.snapshot()
    }

    /// Returns whether the pool is currently running.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }
}
