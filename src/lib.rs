//! vodscribe - resumable VOD transcription worker
//!
//! Consumes transcription jobs from a Redis stream consumer group and runs
//! each one through fetch, transcribe and publish, then records completion,
//! cleans up, and acknowledges.
//!
//! # Architecture
//!
//! Work is checkpointed on disk:
//! - Every stage writes files named after the job's source reference
//! - A stage whose files already exist is skipped
//! - A job is acknowledged only after every step succeeded, so a crashed
//!   worker's job is redelivered and resumes where it stopped
//!
//! # Modules
//!
//! - `adapters`: External tools (yt-dlp, whisperx, object storage, SQLite)
//! - `core`: Stage execution, orchestration, worker loop, retry policy
//! - `domain`: Job payload, artifact layout, execution record
//! - `ingest`: Job stream contract with Redis and in-memory backends
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Start a worker
//! vodscribe work
//!
//! # Queue a job
//! vodscribe enqueue --episode ep42 --kind youtube --vod abc123
//!
//! # Inspect unacknowledged entries
//! vodscribe pending
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod ingest;

// Re-export main types at crate root for convenience
pub use core::{JobOutcome, Orchestrator, StageExecutor, Worker};
pub use domain::{ArtifactLayout, Job, JobKind, JobState};
pub use ingest::{JobStream, MemoryStream, RedisStream};
