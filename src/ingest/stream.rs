//! Consumer-group contract for the durable job stream.
//!
//! A job is claimed by exactly one consumer of the group at a time and stays
//! pending until it is acknowledged. Acknowledgment is the only step of a job
//! that cannot be repeated safely, so callers issue it last.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{Job, JobError};

/// Errors that can occur while talking to the stream
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Stream connection error: {0}")]
    Connection(String),

    #[error("Consumer group '{group}' does not exist on stream '{stream}'")]
    NoGroup { stream: String, group: String },

    #[error("Malformed entry {entry_id}: {source}")]
    Malformed {
        entry_id: String,
        #[source]
        source: JobError,
    },

    #[error("Stream command failed: {0}")]
    Command(String),
}

impl QueueError {
    /// Entry id of a claimed entry that cannot be decoded
    pub fn malformed_entry(&self) -> Option<&str> {
        match self {
            Self::Malformed { entry_id, .. } => Some(entry_id),
            _ => None,
        }
    }
}

/// Result of group initialization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupStatus {
    Created,
    AlreadyExists,
}

/// A job claimed by one consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedJob {
    /// Queue-assigned entry id, used for acknowledgment
    pub entry_id: String,

    /// Times the entry has been delivered to the group, including this one
    pub deliveries: u32,

    pub job: Job,
}

/// A durable stream read through a consumer group
#[async_trait]
pub trait JobStream: Send + Sync {
    /// Stream name, for logs
    fn name(&self) -> &str;

    /// Create the consumer group at the stream origin unless it exists.
    ///
    /// Safe to call on every start.
    async fn ensure_group(&self) -> Result<GroupStatus, QueueError>;

    /// Wait up to `block` for one never-delivered entry.
    ///
    /// `Ok(None)` on timeout.
    async fn claim_next(
        &self,
        consumer: &str,
        block: Duration,
    ) -> Result<Option<ClaimedJob>, QueueError>;

    /// Take over one entry that has been pending longer than `min_idle`
    async fn reclaim_idle(
        &self,
        consumer: &str,
        min_idle: Duration,
    ) -> Result<Option<ClaimedJob>, QueueError>;

    /// Remove an entry from the group's pending list. Idempotent.
    async fn acknowledge(&self, entry_id: &str) -> Result<(), QueueError>;
}

/// Destination for jobs the retry policy gives up on
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn dead_letter(&self, claimed: &ClaimedJob, reason: &str) -> Result<(), QueueError>;
}
