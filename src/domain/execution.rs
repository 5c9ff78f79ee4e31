//! In-memory execution record for a single job.
//!
//! Tracks the job's position in the linear state machine and how long each
//! stage took. Never persisted: the record lives until the job's final log
//! line is written.

use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fetch,
    Transcribe,
    Publish,
}

impl Stage {
    pub const ORDER: [Stage; 3] = [Stage::Fetch, Stage::Transcribe, Stage::Publish];

    /// State the job is in while this stage runs
    pub fn state(self) -> JobState {
        match self {
            Self::Fetch => JobState::Fetching,
            Self::Transcribe => JobState::Transcribing,
            Self::Publish => JobState::Publishing,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetch => write!(f, "fetch"),
            Self::Transcribe => write!(f, "transcribe"),
            Self::Publish => write!(f, "publish"),
        }
    }
}

/// How a stage finished
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    /// Output already on disk; collaborator not invoked
    Skipped,

    /// Collaborator invoked and completed
    Ran,
}

/// Job lifecycle, linear with an absorbing failure state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Dispatched,
    Fetching,
    Transcribing,
    Publishing,
    RecordingCompletion,
    CleaningUp,
    /// Removing the entry from the group's pending list
    Acknowledging,
    Done,
    /// Unsupported kind, acknowledged without running any stage
    Ignored,
    /// Absorbing; the entry stays pending for redelivery
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Ignored | Self::Failed)
    }

    /// Successor on the success path, if any
    pub fn next(self) -> Option<JobState> {
        match self {
            Self::Dispatched => Some(Self::Fetching),
            Self::Fetching => Some(Self::Transcribing),
            Self::Transcribing => Some(Self::Publishing),
            Self::Publishing => Some(Self::RecordingCompletion),
            Self::RecordingCompletion => Some(Self::CleaningUp),
            Self::CleaningUp => Some(Self::Acknowledging),
            Self::Acknowledging => Some(Self::Done),
            Self::Done | Self::Ignored | Self::Failed => None,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Dispatched => "dispatched",
            Self::Fetching => "fetching",
            Self::Transcribing => "transcribing",
            Self::Publishing => "publishing",
            Self::RecordingCompletion => "recording_completion",
            Self::CleaningUp => "cleaning_up",
            Self::Acknowledging => "acknowledging",
            Self::Done => "done",
            Self::Ignored => "ignored",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Timing of one finished stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageTiming {
    pub stage: Stage,
    pub outcome: StageOutcome,
    pub elapsed: Duration,
}

/// Per-job state and timing
#[derive(Debug, Clone)]
pub struct JobExecution {
    pub entry_id: String,
    pub state: JobState,
    pub started_at: DateTime<Utc>,
    started: Instant,
    pub stages: Vec<StageTiming>,
    /// State the job was in when it failed
    pub failed_in: Option<JobState>,
}

impl JobExecution {
    pub fn new(entry_id: impl Into<String>) -> Self {
        Self {
            entry_id: entry_id.into(),
            state: JobState::Dispatched,
            started_at: Utc::now(),
            started: Instant::now(),
            stages: Vec::new(),
            failed_in: None,
        }
    }

    /// Move to a new state. Terminal states are final.
    pub fn transition(&mut self, to: JobState) {
        if self.state.is_terminal() {
            return;
        }
        if to == JobState::Failed {
            self.failed_in = Some(self.state);
        }
        self.state = to;
    }

    pub fn record_stage(&mut self, stage: Stage, outcome: StageOutcome, elapsed: Duration) {
        self.stages.push(StageTiming {
            stage,
            outcome,
            elapsed,
        });
    }

    pub fn stage_timing(&self, stage: Stage) -> Option<&StageTiming> {
        self.stages.iter().find(|t| t.stage == stage)
    }

    /// Wall time since dispatch
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Number of stages that invoked their collaborator
    pub fn stages_run(&self) -> usize {
        self.stages
            .iter()
            .filter(|t| t.outcome == StageOutcome::Ran)
            .count()
    }

    /// Compact per-stage timing for log lines, e.g. `fetch=1.2s transcribe=skipped`
    pub fn timing_summary(&self) -> String {
        self.stages
            .iter()
            .map(|t| match t.outcome {
                StageOutcome::Skipped => format!("{}=skipped", t.stage),
                StageOutcome::Ran => format!("{}={:.1}s", t.stage, t.elapsed.as_secs_f64()),
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_path_order() {
        let mut state = JobState::Dispatched;
        let mut seen = vec![state];
        while let Some(next) = state.next() {
            seen.push(next);
            state = next;
        }

        assert_eq!(
            seen,
            vec![
                JobState::Dispatched,
                JobState::Fetching,
                JobState::Transcribing,
                JobState::Publishing,
                JobState::RecordingCompletion,
                JobState::CleaningUp,
                JobState::Acknowledging,
                JobState::Done,
            ]
        );
    }

    #[test]
    fn test_failed_is_absorbing() {
        let mut exec = JobExecution::new("1-0");
        exec.transition(JobState::Fetching);
        exec.transition(JobState::Failed);
        exec.transition(JobState::Done);

        assert_eq!(exec.state, JobState::Failed);
        assert_eq!(exec.failed_in, Some(JobState::Fetching));
    }

    #[test]
    fn test_started_at_is_dispatch_time() {
        let before = Utc::now();
        let exec = JobExecution::new("1-0");
        let after = Utc::now();

        assert!(exec.started_at >= before && exec.started_at <= after);
        assert_eq!(exec.state, JobState::Dispatched);
        assert_eq!(JobState::Acknowledging.to_string(), "acknowledging");
    }

    #[test]
    fn test_timing_summary() {
        let mut exec = JobExecution::new("1-0");
        exec.record_stage(Stage::Fetch, StageOutcome::Skipped, Duration::ZERO);
        exec.record_stage(Stage::Transcribe, StageOutcome::Ran, Duration::from_millis(2500));

        assert_eq!(exec.timing_summary(), "fetch=skipped transcribe=2.5s");
        assert_eq!(exec.stages_run(), 1);
        assert!(exec.stage_timing(Stage::Publish).is_none());
    }
}
