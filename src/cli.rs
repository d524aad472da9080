//! Command-line interface for the conveyor worker.
//!
//! Provides commands for submitting jobs, running the worker loops, and
//! inspecting or clearing queue state.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use crate::config::QueueConfig;
use crate::handler::CommandHandler;
use crate::pool::QueuePool;
use crate::producer::Producer;
use crate::redis_store::RedisListStore;
use crate::store::ListStore;

/// Self-coordinating Redis job queue worker.
#[derive(Parser)]
#[command(name = "conveyor")]
#[command(about = "Self-coordinating Redis job queue worker")]
#[command(version)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Redis connection URL.
    #[arg(long, global = true, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Submit a job to the pending queue.
    Enqueue(EnqueueArgs),

    /// Run the dispatch and sweep loops until interrupted.
    ///
    /// Job payloads are executed as subprocesses via the bundled command
    /// handler: `{"command": "...", "args": [...]}`.
    Work(WorkArgs),

    /// Show queue depths and their head entries.
    Stats,

    /// Delete both queue lists. Destructive.
    Clear,
}

/// Arguments for the enqueue command.
#[derive(clap::Args)]
pub struct EnqueueArgs {
    /// Job name, used for routing and logging.
    #[arg(long)]
    pub name: String,

    /// Job payload as a JSON document.
    #[arg(long, default_value = "{}")]
    pub payload: String,

    /// Number of copies to submit.
    #[arg(long, default_value_t = 1)]
    pub count: usize,
}

/// Arguments for the work command.
#[derive(clap::Args)]
pub struct WorkArgs {
    /// Maximum number of concurrently executing jobs.
    #[arg(long)]
    pub max_concurrency: Option<usize>,

    /// Claim budget stamped onto requeued work.
    #[arg(long)]
    pub max_attempts: Option<u32>,
}

/// Parses CLI arguments from the process environment.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Runs the parsed CLI command.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let mut config = QueueConfig::from_env().context("invalid queue configuration")?;
    if let Some(url) = cli.redis_url {
        config.redis_url = url;
    }

    match cli.command {
        Commands::Enqueue(args) => enqueue(config, args).await,
        Commands::Work(args) => work(config, args).await,
        Commands::Stats => stats(config).await,
        Commands::Clear => clear(config).await,
    }
}

async fn connect(config: &QueueConfig) -> anyhow::Result<Arc<dyn ListStore>> {
    let store = RedisListStore::connect(&config.redis_url)
        .await
        .with_context(|| format!("failed to connect to {}", config.redis_url))?;
    Ok(Arc::new(store))
}

async fn enqueue(config: QueueConfig, args: EnqueueArgs) -> anyhow::Result<()> {
    let payload: serde_json::Value =
        serde_json::from_str(&args.payload).context("payload is not valid JSON")?;

    let store = connect(&config).await?;
    let producer = Producer::new(store, &config);

    if args.count == 1 {
        let job = producer.enqueue(args.name, payload).await?;
        println!("enqueued job {}", job.id);
    } else {
        let jobs = (0..args.count)
            .map(|_| (args.name.clone(), payload.clone()))
            .collect();
        let records = producer.enqueue_batch(jobs).await?;
        println!("enqueued {} jobs", records.len());
    }

    Ok(())
}

async fn work(mut config: QueueConfig, args: WorkArgs) -> anyhow::Result<()> {
    if let Some(max_concurrency) = args.max_concurrency {
        config.max_concurrency = max_concurrency;
    }
    if let Some(max_attempts) = args.max_attempts {
        config.max_attempts = max_attempts;
    }

    let store = connect(&config).await?;
    let handler = Arc::new(CommandHandler::new(config.job_timeout));

    let mut pool = QueuePool::new(config, store, handler)?;
    pool.start()?;

    info!("worker running, press ctrl-c to stop");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    pool.shutdown().await?;

    let stats = pool.stats();
    println!(
        "processed {} jobs ({} succeeded, {} failed, {} discarded)",
        stats.total_processed(),
        stats.jobs_succeeded,
        stats.jobs_failed,
        stats.jobs_discarded
    );

    Ok(())
}

async fn stats(config: QueueConfig) -> anyhow::Result<()> {
    let store = connect(&config).await?;

    for list in [&config.pending_list, &config.in_flight_list] {
        let len = store.len(list).await?;
        match store.peek_head(list).await? {
            Some(head) => println!(
                "{list}: {len} jobs, head {} ({}, attempts {})",
                head.id, head.name, head.attempts
            ),
            None => println!("{list}: empty"),
        }
    }

    Ok(())
}

async fn clear(config: QueueConfig) -> anyhow::Result<()> {
    let store = connect(&config).await?;

    store.delete(&config.pending_list).await?;
    store.delete(&config.in_flight_list).await?;
    warn!(
        pending = %config.pending_list,
        in_flight = %config.in_flight_list,
        "cleared queue lists"
    );

    Ok(())
}
