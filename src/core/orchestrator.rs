//! Per-job pipeline orchestration.
//!
//! Drives one claimed job through fetch, transcribe, publish, completion
//! record and cleanup, then acknowledges it. Any failure stops the job in
//! `Failed` without acknowledgment, leaving the entry pending for redelivery.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{error, info, instrument};

use crate::adapters::CompletionRecorder;
use crate::domain::{JobExecution, JobState, Stage};
use crate::ingest::{ClaimedJob, JobStream};

use super::stage::StageExecutor;

/// How a job ended
#[derive(Debug)]
pub enum JobOutcome {
    /// Every stage succeeded and the entry was acknowledged
    Completed(JobExecution),

    /// Unsupported kind, acknowledged without running any stage
    Ignored(JobExecution),

    /// Stopped before acknowledgment
    Failed {
        execution: JobExecution,
        error: anyhow::Error,
    },
}

impl JobOutcome {
    pub fn execution(&self) -> &JobExecution {
        match self {
            Self::Completed(execution) | Self::Ignored(execution) => execution,
            Self::Failed { execution, .. } => execution,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Runs claimed jobs to completion
pub struct Orchestrator {
    executor: StageExecutor,
    recorder: Arc<dyn CompletionRecorder>,
    cleanup: bool,
}

impl Orchestrator {
    pub fn new(executor: StageExecutor, recorder: Arc<dyn CompletionRecorder>) -> Self {
        Self {
            executor,
            recorder,
            cleanup: true,
        }
    }

    /// Keep artifacts on disk after success
    pub fn keep_artifacts(mut self) -> Self {
        self.cleanup = false;
        self
    }

    pub fn executor(&self) -> &StageExecutor {
        &self.executor
    }

    /// Process one claimed job. Acknowledgment, when it happens, is the last
    /// action taken.
    #[instrument(
        skip(self, claimed, stream),
        fields(
            entry_id = %claimed.entry_id,
            episode = %claimed.job.episode_id,
            vod = %claimed.job.source_ref,
        )
    )]
    pub async fn process(&self, claimed: &ClaimedJob, stream: &dyn JobStream) -> JobOutcome {
        let mut execution = JobExecution::new(&claimed.entry_id);

        if !claimed.job.kind.is_supported() {
            info!(kind = %claimed.job.kind, "Unsupported job kind, acknowledging");
            return match stream.acknowledge(&claimed.entry_id).await {
                Ok(()) => {
                    execution.transition(JobState::Ignored);
                    info!(
                        started_at = %execution.started_at.to_rfc3339(),
                        elapsed_ms = execution.elapsed().as_millis() as u64,
                        "Job ignored"
                    );
                    JobOutcome::Ignored(execution)
                }
                Err(e) => self.fail(execution, anyhow::Error::new(e).context("Acknowledge failed")),
            };
        }

        if claimed.deliveries > 1 {
            info!(deliveries = claimed.deliveries, "Resuming redelivered job");
        }

        match self.run_pipeline(claimed, stream, &mut execution).await {
            Ok(()) => {
                execution.transition(JobState::Done);
                info!(
                    started_at = %execution.started_at.to_rfc3339(),
                    elapsed_ms = execution.elapsed().as_millis() as u64,
                    stages = %execution.timing_summary(),
                    "Job complete"
                );
                JobOutcome::Completed(execution)
            }
            Err(e) => self.fail(execution, e),
        }
    }

    async fn run_pipeline(
        &self,
        claimed: &ClaimedJob,
        stream: &dyn JobStream,
        execution: &mut JobExecution,
    ) -> Result<()> {
        let job = &claimed.job;

        for stage in Stage::ORDER {
            execution.transition(stage.state());
            let started = Instant::now();
            let outcome = self.executor.run(stage, job).await?;
            execution.record_stage(stage, outcome, started.elapsed());
        }

        execution.transition(JobState::RecordingCompletion);
        self.recorder
            .mark_captions_available(&job.episode_id)
            .await
            .context("Completion record failed")?;

        execution.transition(JobState::CleaningUp);
        if self.cleanup {
            let removed = self
                .executor
                .layout()
                .cleanup(&job.source_ref)
                .await
                .with_context(|| format!("Failed to clean up artifacts for {}", job.source_ref))?;
            info!(removed, "Artifacts removed");
        }

        execution.transition(JobState::Acknowledging);
        stream
            .acknowledge(&claimed.entry_id)
            .await
            .context("Acknowledge failed")?;

        Ok(())
    }

    fn fail(&self, mut execution: JobExecution, error: anyhow::Error) -> JobOutcome {
        execution.transition(JobState::Failed);
        let failed_in = execution
            .failed_in
            .map(|s| s.to_string())
            .unwrap_or_default();

        error!(
            state = %failed_in,
            started_at = %execution.started_at.to_rfc3339(),
            elapsed_ms = execution.elapsed().as_millis() as u64,
            stages = %execution.timing_summary(),
            error = %format!("{:#}", error),
            "Job failed, leaving entry pending"
        );

        JobOutcome::Failed { execution, error }
    }
}
