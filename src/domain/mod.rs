//! Domain types for the transcription worker.
//!
//! - Job: a decoded stream entry
//! - Artifact: on-disk stage outputs keyed by source reference
//! - Execution: in-memory per-job state and timing

pub mod artifact;
pub mod execution;
pub mod job;

pub use artifact::{ArtifactLayout, TranscriptFormat};
pub use execution::{JobExecution, JobState, Stage, StageOutcome, StageTiming};
pub use job::{Job, JobError, JobKind};
