//! Worker loop: claim, process, repeat.
//!
//! A worker is one named consumer of the group running one job at a time.
//! It never stops on its own. Queue errors are logged and followed by a short
//! pause, job failures are left pending for redelivery (or dead-lettered once
//! the retry policy gives up).

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::WorkerSettings;
use crate::ingest::{ClaimedJob, DeadLetterSink, GroupStatus, JobStream, QueueError};

use super::orchestrator::{JobOutcome, Orchestrator};
use super::retry::{RetryDecision, RetryPolicy};

/// Pause after a queue error before trying again
pub const QUEUE_ERROR_PAUSE: Duration = Duration::from_secs(1);

/// Per-worker settings
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub consumer: String,
    pub block_timeout: Duration,
    /// Take over entries idle this long before reading new ones
    pub reclaim_idle: Option<Duration>,
    pub retry: RetryPolicy,
}

impl WorkerOptions {
    pub fn from_settings(settings: &WorkerSettings, consumer: impl Into<String>) -> Self {
        Self {
            consumer: consumer.into(),
            block_timeout: Duration::from_millis(settings.block_ms),
            reclaim_idle: settings.reclaim_idle_ms.map(Duration::from_millis),
            retry: settings.retry.clone(),
        }
    }
}

/// Result of one loop iteration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tick {
    /// Nothing arrived before the block timeout
    Idle,
    Completed { entry_id: String },
    Ignored { entry_id: String },
    /// Left pending; wait `retry_in` before the next claim
    Failed { entry_id: String, retry_in: Duration },
    /// Retry policy gave up; written to the dead-letter stream and acknowledged
    DeadLettered { entry_id: String },
    /// Undecodable entry, acknowledged and dropped
    Discarded { entry_id: String },
}

impl Tick {
    /// True if the iteration handled an entry
    pub fn handled_entry(&self) -> bool {
        !matches!(self, Tick::Idle)
    }
}

enum Claim {
    Nothing,
    Job(ClaimedJob),
    Discarded(String),
}

/// One consumer of the job stream
pub struct Worker {
    stream: Arc<dyn JobStream>,
    dead_letter: Option<Arc<dyn DeadLetterSink>>,
    orchestrator: Arc<Orchestrator>,
    options: WorkerOptions,
}

impl Worker {
    pub fn new(
        stream: Arc<dyn JobStream>,
        orchestrator: Arc<Orchestrator>,
        options: WorkerOptions,
    ) -> Self {
        Self {
            stream,
            dead_letter: None,
            orchestrator,
            options,
        }
    }

    /// Route jobs the retry policy gives up on to a dead-letter sink
    pub fn with_dead_letter(mut self, sink: Arc<dyn DeadLetterSink>) -> Self {
        self.dead_letter = Some(sink);
        self
    }

    pub fn consumer(&self) -> &str {
        &self.options.consumer
    }

    /// Build `size` workers sharing one orchestrator. Consumers are named
    /// `{consumer}-{n}` when there is more than one.
    pub fn pool(
        stream: Arc<dyn JobStream>,
        dead_letter: Option<Arc<dyn DeadLetterSink>>,
        orchestrator: Arc<Orchestrator>,
        options: WorkerOptions,
        size: usize,
    ) -> Vec<Worker> {
        let size = size.max(1);
        (0..size)
            .map(|n| {
                let mut options = options.clone();
                if size > 1 {
                    options.consumer = format!("{}-{}", options.consumer, n + 1);
                }
                Worker {
                    stream: Arc::clone(&stream),
                    dead_letter: dead_letter.clone(),
                    orchestrator: Arc::clone(&orchestrator),
                    options,
                }
            })
            .collect()
    }

    /// Claim and process at most one entry
    pub async fn tick(&self) -> Result<Tick, QueueError> {
        let consumer = &self.options.consumer;

        let mut claim = Claim::Nothing;
        if let Some(min_idle) = self.options.reclaim_idle {
            claim = self
                .screen(self.stream.reclaim_idle(consumer, min_idle).await)
                .await?;
        }
        if let Claim::Nothing = claim {
            claim = self
                .screen(
                    self.stream
                        .claim_next(consumer, self.options.block_timeout)
                        .await,
                )
                .await?;
        }

        let claimed = match claim {
            Claim::Nothing => return Ok(Tick::Idle),
            Claim::Discarded(entry_id) => return Ok(Tick::Discarded { entry_id }),
            Claim::Job(claimed) => claimed,
        };

        debug!(
            entry_id = %claimed.entry_id,
            consumer = %consumer,
            deliveries = claimed.deliveries,
            "Claimed job"
        );

        match self.orchestrator.process(&claimed, self.stream.as_ref()).await {
            JobOutcome::Completed(_) => Ok(Tick::Completed {
                entry_id: claimed.entry_id,
            }),
            JobOutcome::Ignored(_) => Ok(Tick::Ignored {
                entry_id: claimed.entry_id,
            }),
            JobOutcome::Failed { error, .. } => self.after_failure(claimed, &error).await,
        }
    }

    /// Acknowledge and drop entries that cannot be decoded
    async fn screen(
        &self,
        result: Result<Option<ClaimedJob>, QueueError>,
    ) -> Result<Claim, QueueError> {
        match result {
            Ok(None) => Ok(Claim::Nothing),
            Ok(Some(claimed)) => Ok(Claim::Job(claimed)),
            Err(e) => {
                let Some(entry_id) = e.malformed_entry().map(str::to_string) else {
                    return Err(e);
                };
                warn!(entry_id = %entry_id, error = %e, "Dropping malformed entry");
                self.stream.acknowledge(&entry_id).await?;
                Ok(Claim::Discarded(entry_id))
            }
        }
    }

    async fn after_failure(
        &self,
        claimed: ClaimedJob,
        error: &anyhow::Error,
    ) -> Result<Tick, QueueError> {
        let attempt = claimed.deliveries;

        if let (RetryDecision::GiveUp, Some(sink)) =
            (self.options.retry.decide(attempt), &self.dead_letter)
        {
            let reason = format!("{:#}", error);
            sink.dead_letter(&claimed, &reason).await?;
            self.stream.acknowledge(&claimed.entry_id).await?;
            warn!(
                entry_id = %claimed.entry_id,
                deliveries = attempt,
                "Retry limit reached, job dead-lettered"
            );
            return Ok(Tick::DeadLettered {
                entry_id: claimed.entry_id,
            });
        }

        Ok(Tick::Failed {
            entry_id: claimed.entry_id,
            retry_in: self.options.retry.delay_for_attempt(attempt),
        })
    }

    /// Run until the process stops
    pub async fn run(&self) {
        info!(consumer = %self.options.consumer, stream = self.stream.name(), "Worker started");
        loop {
            self.step().await;
        }
    }

    /// Run until one entry has been handled
    pub async fn run_once(&self) -> Tick {
        loop {
            if let Some(tick) = self.step().await {
                if tick.handled_entry() {
                    return tick;
                }
            }
        }
    }

    async fn step(&self) -> Option<Tick> {
        match self.tick().await {
            Ok(tick) => {
                if let Tick::Failed { retry_in, .. } = &tick {
                    if !retry_in.is_zero() {
                        debug!(delay_ms = retry_in.as_millis() as u64, "Backing off");
                        tokio::time::sleep(*retry_in).await;
                    }
                }
                Some(tick)
            }
            Err(e) => {
                warn!(consumer = %self.options.consumer, error = %e, "Queue error");
                tokio::time::sleep(QUEUE_ERROR_PAUSE).await;
                None
            }
        }
    }
}

/// Create the consumer group, retrying until the queue accepts it
pub async fn initialize_group(stream: &dyn JobStream, pause: Duration) -> GroupStatus {
    loop {
        match stream.ensure_group().await {
            Ok(status) => {
                match status {
                    GroupStatus::Created => info!(stream = stream.name(), "Created consumer group"),
                    GroupStatus::AlreadyExists => {
                        debug!(stream = stream.name(), "Consumer group exists")
                    }
                }
                return status;
            }
            Err(e) => {
                warn!(stream = stream.name(), error = %e, "Group initialization failed, retrying");
                tokio::time::sleep(pause).await;
            }
        }
    }
}

/// Run every worker concurrently. Returns only if all of them exit.
pub async fn run_pool(workers: Vec<Worker>) {
    let mut set = JoinSet::new();
    info!(workers = workers.len(), "Starting worker pool");

    for worker in workers {
        set.spawn(async move { worker.run().await });
    }

    while let Some(result) = set.join_next().await {
        if let Err(e) = result {
            error!(error = %e, "Worker task ended abnormally");
        }
    }
}
