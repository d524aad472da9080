//! End-to-end tests of the claim, retire, and sweep protocols over the
//! in-process store backend.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use conveyor::{
    DispatchOutcome, Dispatcher, JobHandler, JobRecord, ListStore, MemoryListStore, Producer,
    QueueConfig, QueuePool, RetrySweeper, SharedPoolStats, SweepOutcome,
};

/// Handler that records every job it sees and returns a fixed outcome.
struct StaticHandler {
    succeed: bool,
    seen: Mutex<Vec<JobRecord>>,
}

impl StaticHandler {
    fn succeeding() -> Arc<Self> {
        Arc::new(Self {
            succeed: true,
            seen: Mutex::new(Vec::new()),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            succeed: false,
            seen: Mutex::new(Vec::new()),
        })
    }

    fn seen(&self) -> Vec<JobRecord> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobHandler for StaticHandler {
    async fn execute(&self, job: &JobRecord) -> anyhow::Result<()> {
        self.seen.lock().unwrap().push(job.clone());
        if self.succeed {
            Ok(())
        } else {
            anyhow::bail!("synthetic failure")
        }
    }
}

/// Handler that tracks its own peak concurrency while sleeping.
struct ConcurrencyProbe {
    delay: Duration,
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyProbe {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl JobHandler for ConcurrencyProbe {
    async fn execute(&self, _job: &JobRecord) -> anyhow::Result<()> {
        let running = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

fn test_config() -> QueueConfig {
    let mut config = QueueConfig::default();
    config.lock_poll_interval = Duration::from_millis(10);
    config.dispatch_interval = Duration::from_millis(10);
    config.sweep_interval = Duration::from_millis(50);
    config
}

fn new_store() -> Arc<dyn ListStore> {
    Arc::new(MemoryListStore::new())
}

fn dispatcher(store: &Arc<dyn ListStore>, handler: Arc<dyn JobHandler>) -> Dispatcher {
    Dispatcher::new(
        Arc::clone(store),
        handler,
        &test_config(),
        Arc::new(SharedPoolStats::new()),
    )
}

fn sweeper(store: &Arc<dyn ListStore>) -> RetrySweeper {
    RetrySweeper::new(
        Arc::clone(store),
        &test_config(),
        Arc::new(SharedPoolStats::new()),
    )
}

/// Builds an in-flight record claimed `minutes_ago` with the given budget.
fn in_flight_record(attempts: u32, max_attempts: u32, minutes_ago: i64) -> JobRecord {
    let mut job = JobRecord::new("crashed", serde_json::json!({})).with_max_attempts(max_attempts);
    job.attempts = attempts;
    job.claimed_at = Some(Utc::now() - chrono::Duration::minutes(minutes_ago));
    job
}

/// Rewrites the head claim timestamp as if it were made `minutes_ago`.
async fn backdate_head(store: &Arc<dyn ListStore>, list: &str, minutes_ago: i64) {
    let mut job = store.pop_head(list).await.unwrap().expect("head to backdate");
    job.claimed_at = Some(Utc::now() - chrono::Duration::minutes(minutes_ago));
    store.append(list, &job).await.unwrap();
}

#[tokio::test]
async fn successful_job_is_claimed_executed_and_retired() {
    let store = new_store();
    let config = test_config();
    let handler = StaticHandler::succeeding();
    let producer = Producer::new(Arc::clone(&store), &config);
    let dispatcher = dispatcher(&store, handler.clone());

    let job = producer
        .enqueue("thumbnail", serde_json::json!({"path": "/img/a.png"}))
        .await
        .unwrap();

    let outcome = dispatcher.tick().await.unwrap();

    assert_eq!(outcome, DispatchOutcome::Completed(job.id));
    assert_eq!(store.len("pending").await.unwrap(), 0);
    assert_eq!(store.len("in-flight").await.unwrap(), 0);

    let seen = handler.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].id, job.id);
    assert_eq!(seen[0].attempts, 1);
    assert!(seen[0].claimed_at.is_some());
}

#[tokio::test]
async fn tick_on_empty_queue_is_idle() {
    let store = new_store();
    let dispatcher = dispatcher(&store, StaticHandler::succeeding());

    assert_eq!(dispatcher.tick().await.unwrap(), DispatchOutcome::Idle);
}

#[tokio::test]
async fn failed_job_stays_discoverable_in_flight() {
    let store = new_store();
    let config = test_config();
    let handler = StaticHandler::failing();
    let producer = Producer::new(Arc::clone(&store), &config);
    let dispatcher = dispatcher(&store, handler);

    let job = producer.enqueue("flaky", serde_json::json!({})).await.unwrap();

    let outcome = dispatcher.tick().await.unwrap();

    assert_eq!(outcome, DispatchOutcome::Failed(job.id));
    assert_eq!(store.len("pending").await.unwrap(), 0);

    let in_flight = store.list_all("in-flight").await.unwrap();
    assert_eq!(in_flight.len(), 1);
    assert_eq!(in_flight[0].id, job.id);
    assert_eq!(in_flight[0].attempts, 1);
}

#[tokio::test]
async fn job_is_always_in_exactly_one_list() {
    let store = new_store();
    let config = test_config();
    let producer = Producer::new(Arc::clone(&store), &config);
    let dispatcher = dispatcher(&store, StaticHandler::failing());
    let sweeper = sweeper(&store);

    let job = producer.enqueue("tracked", serde_json::json!({})).await.unwrap();

    let membership = |pending: Vec<JobRecord>, in_flight: Vec<JobRecord>| {
        let in_pending = pending.iter().any(|r| r.id == job.id);
        let in_flight = in_flight.iter().any(|r| r.id == job.id);
        (in_pending, in_flight)
    };

    let (p, f) = membership(
        store.list_all("pending").await.unwrap(),
        store.list_all("in-flight").await.unwrap(),
    );
    assert!(p && !f, "enqueued job belongs to pending only");

    dispatcher.tick().await.unwrap();
    let (p, f) = membership(
        store.list_all("pending").await.unwrap(),
        store.list_all("in-flight").await.unwrap(),
    );
    assert!(!p && f, "claimed job belongs to in-flight only");

    backdate_head(&store, "in-flight", 11).await;
    sweeper.sweep().await.unwrap();
    let (p, f) = membership(
        store.list_all("pending").await.unwrap(),
        store.list_all("in-flight").await.unwrap(),
    );
    assert!(p && !f, "requeued job belongs to pending only");
}

#[tokio::test]
async fn sweep_leaves_fresh_claim_alone() {
    let store = new_store();
    let sweeper = sweeper(&store);
    let job = in_flight_record(1, 3, 1);
    store.append("in-flight", &job).await.unwrap();

    let outcome = sweeper.sweep().await.unwrap();

    assert_eq!(outcome, SweepOutcome::Fresh);
    assert_eq!(store.peek_head("in-flight").await.unwrap(), Some(job));
}

#[tokio::test]
async fn sweep_on_empty_list_is_noop() {
    let store = new_store();
    let sweeper = sweeper(&store);

    assert_eq!(sweeper.sweep().await.unwrap(), SweepOutcome::Empty);
}

#[tokio::test]
async fn sweep_requeues_stale_claim_without_touching_attempts() {
    let store = new_store();
    let sweeper = sweeper(&store);
    let job = in_flight_record(1, 3, 11);
    store.append("in-flight", &job).await.unwrap();

    let outcome = sweeper.sweep().await.unwrap();

    assert_eq!(outcome, SweepOutcome::Requeued(job.id));
    assert_eq!(store.len("in-flight").await.unwrap(), 0);

    let requeued = store.peek_head("pending").await.unwrap().expect("requeued job");
    assert_eq!(requeued.id, job.id);
    assert_eq!(requeued.attempts, 1);
    assert!(requeued.claimed_at.is_none());
}

#[tokio::test]
async fn sweep_discards_stale_exhausted_job() {
    let store = new_store();
    let stats = Arc::new(SharedPoolStats::new());
    let sweeper = RetrySweeper::new(Arc::clone(&store), &test_config(), Arc::clone(&stats));
    let job = in_flight_record(3, 3, 11);
    store.append("in-flight", &job).await.unwrap();

    let outcome = sweeper.sweep().await.unwrap();

    assert_eq!(outcome, SweepOutcome::Discarded(job.id));
    assert_eq!(store.len("pending").await.unwrap(), 0);
    assert_eq!(store.len("in-flight").await.unwrap(), 0);
    assert_eq!(stats.snapshot().jobs_discarded, 1);
}

#[tokio::test]
async fn concurrent_ticks_claim_distinct_jobs() {
    let store = new_store();
    let config = test_config();
    let handler = StaticHandler::succeeding();
    let producer = Producer::new(Arc::clone(&store), &config);

    let first = producer.enqueue("one", serde_json::json!({})).await.unwrap();
    let second = producer.enqueue("two", serde_json::json!({})).await.unwrap();

    let a = dispatcher(&store, handler.clone());
    let b = dispatcher(&store, handler.clone());

    let (ra, rb) = tokio::join!(a.tick(), b.tick());
    ra.unwrap();
    rb.unwrap();

    let mut seen: Vec<_> = handler.seen().iter().map(|r| r.id).collect();
    seen.sort();
    let mut expected = vec![first.id, second.id];
    expected.sort();

    // Each job claimed exactly once across the two contending dispatchers.
    assert_eq!(seen, expected);
    assert_eq!(store.len("pending").await.unwrap(), 0);
    assert_eq!(store.len("in-flight").await.unwrap(), 0);
}

#[tokio::test]
async fn retries_are_bounded_by_the_claim_budget() {
    let store = new_store();
    let mut config = test_config();
    config.max_attempts = 2;
    let handler = StaticHandler::failing();
    let producer = Producer::new(Arc::clone(&store), &config);
    let dispatcher = Dispatcher::new(
        Arc::clone(&store),
        handler.clone(),
        &config,
        Arc::new(SharedPoolStats::new()),
    );
    let sweeper = RetrySweeper::new(
        Arc::clone(&store),
        &config,
        Arc::new(SharedPoolStats::new()),
    );

    producer.enqueue("doomed", serde_json::json!({})).await.unwrap();

    assert!(matches!(
        dispatcher.tick().await.unwrap(),
        DispatchOutcome::Failed(_)
    ));
    backdate_head(&store, "in-flight", 11).await;
    assert!(matches!(
        sweeper.sweep().await.unwrap(),
        SweepOutcome::Requeued(_)
    ));

    assert!(matches!(
        dispatcher.tick().await.unwrap(),
        DispatchOutcome::Failed(_)
    ));
    backdate_head(&store, "in-flight", 11).await;
    assert!(matches!(
        sweeper.sweep().await.unwrap(),
        SweepOutcome::Discarded(_)
    ));

    // Two executions, never more, and the job is gone from both lists.
    let seen = handler.seen();
    assert_eq!(seen.len(), 2);
    assert!(seen.iter().all(|r| r.attempts <= 2));
    assert_eq!(store.len("pending").await.unwrap(), 0);
    assert_eq!(store.len("in-flight").await.unwrap(), 0);
}

#[tokio::test]
async fn pool_bounds_concurrent_executions() {
    let store = new_store();
    let mut config = test_config();
    config.max_concurrency = 2;
    let probe = ConcurrencyProbe::new(Duration::from_millis(100));
    let producer = Producer::new(Arc::clone(&store), &config);

    producer
        .enqueue_batch(
            (0..6)
                .map(|i| (format!("job-{i}"), serde_json::json!({})))
                .collect(),
        )
        .await
        .unwrap();

    let mut pool = QueuePool::new(config, Arc::clone(&store), probe.clone()).unwrap();
    pool.start().unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if pool.stats().jobs_succeeded == 6 {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "pool did not drain the queue in time"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    pool.shutdown().await.unwrap();

    assert!(probe.peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(store.len("pending").await.unwrap(), 0);
    assert_eq!(store.len("in-flight").await.unwrap(), 0);
}

#[tokio::test]
async fn pool_lifecycle_guards() {
    let store = new_store();
    let mut pool = QueuePool::new(
        test_config(),
        Arc::clone(&store),
        StaticHandler::succeeding(),
    )
    .unwrap();

    assert!(pool.shutdown().await.is_err());
    pool.start().unwrap();
    assert!(pool.start().is_err());
    pool.shutdown().await.unwrap();
    assert!(!pool.is_running());
}
