//! Core job processing.
//!
//! This module contains:
//! - StageExecutor: runs one stage, skipping it when its output exists
//! - Orchestrator: drives a claimed job through every stage to acknowledgment
//! - Worker: the claim loop and the worker pool
//! - RetryPolicy: what happens to a job after it fails

pub mod orchestrator;
pub mod retry;
pub mod stage;
pub mod worker;

pub use orchestrator::{JobOutcome, Orchestrator};
pub use retry::{RetryDecision, RetryPolicy};
pub use stage::{StageExecutor, StageOptions};
pub use worker::{initialize_group, run_pool, Tick, Worker, WorkerOptions, QUEUE_ERROR_PAUSE};
