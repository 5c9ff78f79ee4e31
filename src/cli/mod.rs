//! Command-line interface for vodscribe.
//!
//! Runs the transcription worker and provides operator helpers for the
//! job stream and the local artifact cache.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use crate::adapters::{HttpObjectStore, SqliteRecorder, WhisperX, YtDlpFetcher};
use crate::config::{load_config, ResolvedConfig};
use crate::core::{
    initialize_group, run_pool, Orchestrator, StageExecutor, StageOptions, Tick, Worker,
    WorkerOptions, QUEUE_ERROR_PAUSE,
};
use crate::domain::{Job, JobKind};
use crate::ingest::{DeadLetterSink, JobStream, RedisStream};

/// vodscribe - resumable VOD transcription worker
#[derive(Parser, Debug)]
#[command(name = "vodscribe")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (defaults to .vodscribe/config.yaml discovery)
    #[arg(long, global = true, env = "VODSCRIBE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Consume jobs from the stream
    Work {
        /// Process a single job, then exit
        #[arg(long)]
        once: bool,

        /// Concurrent workers (overrides worker.pool_size)
        #[arg(long)]
        pool_size: Option<usize>,

        /// Consumer name (overrides worker.consumer)
        #[arg(long)]
        consumer: Option<String>,
    },

    /// Append a job to the stream
    Enqueue {
        /// Episode id to mark when captions are published
        #[arg(long)]
        episode: String,

        /// Source kind (youtube, twitch)
        #[arg(long, default_value = "youtube")]
        kind: String,

        /// Source reference, e.g. a YouTube video id
        #[arg(long)]
        vod: String,
    },

    /// Show entries claimed but not yet acknowledged
    Pending {
        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete local artifacts for a source reference
    Cleanup {
        /// Source reference
        vod: String,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let config = load_config(self.config.as_deref())?;

        match self.command {
            Commands::Work {
                once,
                pool_size,
                consumer,
            } => work(&config, once, pool_size, consumer).await,
            Commands::Enqueue { episode, kind, vod } => {
                enqueue(&config, &episode, &kind, &vod).await
            }
            Commands::Pending { json } => show_pending(&config, json).await,
            Commands::Cleanup { vod } => cleanup(&config, &vod).await,
            Commands::Config => {
                print!("{}", config.describe());
                Ok(())
            }
        }
    }
}

/// Construct the collaborators once and wire them into an orchestrator
fn build_orchestrator(config: &ResolvedConfig) -> Result<Orchestrator> {
    let executor = StageExecutor::new(
        config.layout.clone(),
        Arc::new(YtDlpFetcher::new(config.fetch.clone())),
        Arc::new(WhisperX::new(config.transcribe.clone())),
        Arc::new(HttpObjectStore::new(&config.storage)),
        StageOptions {
            keep_video: config.fetch.keep_video,
            publish_formats: config.storage.formats.clone(),
            key_prefix: config.storage.key_prefix.clone(),
        },
    );
    let recorder = SqliteRecorder::open(&config.database)?;

    let orchestrator = Orchestrator::new(executor, Arc::new(recorder));
    Ok(if config.worker.cleanup {
        orchestrator
    } else {
        orchestrator.keep_artifacts()
    })
}

async fn work(
    config: &ResolvedConfig,
    once: bool,
    pool_size: Option<usize>,
    consumer: Option<String>,
) -> Result<()> {
    let orchestrator = Arc::new(build_orchestrator(config)?);
    let redis = Arc::new(
        RedisStream::connect(&config.redis)
            .await
            .context("Failed to connect to Redis")?,
    );
    let stream: Arc<dyn JobStream> = redis.clone();
    let dead_letter: Option<Arc<dyn DeadLetterSink>> = config
        .redis
        .dead_letter_stream
        .as_ref()
        .map(|_| redis.clone() as Arc<dyn DeadLetterSink>);

    initialize_group(stream.as_ref(), QUEUE_ERROR_PAUSE).await;

    let consumer = consumer.unwrap_or_else(|| config.consumer_name());
    let options = WorkerOptions::from_settings(&config.worker, consumer);
    let size = if once {
        1
    } else {
        pool_size.unwrap_or(config.worker.pool_size)
    };
    let mut workers = Worker::pool(stream, dead_letter, orchestrator, options, size);

    if once {
        let Some(worker) = workers.pop() else {
            anyhow::bail!("No worker to run");
        };
        tokio::select! {
            tick = worker.run_once() => report_once(&tick),
            _ = tokio::signal::ctrl_c() => info!("Interrupted, exiting"),
        }
        return Ok(());
    }

    tokio::select! {
        _ = run_pool(workers) => {}
        _ = tokio::signal::ctrl_c() => info!("Interrupted, exiting"),
    }
    Ok(())
}

fn report_once(tick: &Tick) {
    match tick {
        Tick::Completed { entry_id } => eprintln!("[{} completed]", entry_id),
        Tick::Ignored { entry_id } => eprintln!("[{} ignored: unsupported kind]", entry_id),
        Tick::Failed { entry_id, .. } => eprintln!("[{} failed, left pending]", entry_id),
        Tick::DeadLettered { entry_id } => eprintln!("[{} dead-lettered]", entry_id),
        Tick::Discarded { entry_id } => eprintln!("[{} discarded: malformed]", entry_id),
        Tick::Idle => {}
    }
}

async fn enqueue(config: &ResolvedConfig, episode: &str, kind: &str, vod: &str) -> Result<()> {
    let job = Job::new(episode, JobKind::parse(kind), vod);
    if !job.kind.is_supported() {
        eprintln!("Warning: kind '{}' is not supported and will be ignored by workers", kind);
    }

    let stream = RedisStream::connect(&config.redis).await?;
    let entry_id = stream.enqueue(&job).await?;
    println!("{}", entry_id);
    Ok(())
}

async fn show_pending(config: &ResolvedConfig, json: bool) -> Result<()> {
    let stream = RedisStream::connect(&config.redis).await?;
    let summary = stream.pending().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!(
        "Stream: {}  Group: {}  Pending: {}",
        stream.name(),
        stream.group(),
        summary.count
    );
    if summary.count == 0 {
        return Ok(());
    }
    if let (Some(oldest), Some(newest)) = (&summary.oldest, &summary.newest) {
        println!("Range: {} .. {}", oldest, newest);
    }
    println!("\n{:<30} {:>8}", "CONSUMER", "PENDING");
    println!("{}", "-".repeat(40));
    for (consumer, count) in &summary.consumers {
        println!("{:<30} {:>8}", consumer, count);
    }
    Ok(())
}

async fn cleanup(config: &ResolvedConfig, vod: &str) -> Result<()> {
    let removed = config
        .layout
        .cleanup(vod)
        .await
        .with_context(|| format!("Failed to clean up artifacts for {}", vod))?;
    println!("Removed {} file(s) for {}", removed, vod);
    Ok(())
}
