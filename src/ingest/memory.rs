//! In-process job stream with consumer-group semantics.
//!
//! Mirrors what the worker relies on from Redis: entries are delivered to one
//! consumer, stay pending until acknowledged, and blocking claims return empty
//! after the block duration. Used for tests and local dry runs.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::domain::Job;

use super::stream::{ClaimedJob, DeadLetterSink, GroupStatus, JobStream, QueueError};

#[derive(Debug, Clone)]
struct PendingEntry {
    consumer: String,
    deliveries: u32,
    delivered_at: Instant,
}

#[derive(Debug, Default)]
struct State {
    group_created: bool,
    next_seq: u64,
    /// All entries ever appended, in order
    entries: Vec<(String, HashMap<String, String>)>,
    /// Index of the next never-delivered entry
    cursor: usize,
    pending: BTreeMap<String, PendingEntry>,
    acknowledged: Vec<String>,
    dead_letters: Vec<(String, String)>,
    fail_acks: bool,
}

/// In-memory stream and consumer group
pub struct MemoryStream {
    name: String,
    state: Mutex<State>,
    appended: Notify,
}

impl Default for MemoryStream {
    fn default() -> Self {
        Self::new("vods")
    }
}

impl MemoryStream {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(State::default()),
            appended: Notify::new(),
        }
    }

    /// Append a job, returning its entry id
    pub async fn push(&self, job: &Job) -> String {
        let fields = job
            .to_fields()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        self.push_fields(fields).await
    }

    /// Append raw entry fields, returning the entry id
    pub async fn push_fields(&self, fields: HashMap<String, String>) -> String {
        let id = {
            let mut state = self.state.lock().await;
            state.next_seq += 1;
            let id = format!("{}-0", state.next_seq);
            state.entries.push((id.clone(), fields));
            id
        };
        self.appended.notify_waiters();
        id
    }

    /// Entry ids delivered but not acknowledged
    pub async fn pending_ids(&self) -> Vec<String> {
        self.state.lock().await.pending.keys().cloned().collect()
    }

    /// Consumer currently owning a pending entry
    pub async fn owner(&self, entry_id: &str) -> Option<String> {
        self.state
            .lock()
            .await
            .pending
            .get(entry_id)
            .map(|p| p.consumer.clone())
    }

    /// Acknowledgments in the order they happened (repeats included)
    pub async fn acknowledged(&self) -> Vec<String> {
        self.state.lock().await.acknowledged.clone()
    }

    /// (entry id, reason) of dead-lettered entries
    pub async fn dead_letters(&self) -> Vec<(String, String)> {
        self.state.lock().await.dead_letters.clone()
    }

    /// Make every acknowledgment fail until switched off
    pub async fn set_fail_acks(&self, fail: bool) {
        self.state.lock().await.fail_acks = fail;
    }

    fn claim(&self, state: &mut State, consumer: &str) -> Result<Option<ClaimedJob>, QueueError> {
        if !state.group_created {
            return Err(QueueError::NoGroup {
                stream: self.name.clone(),
                group: "memory".to_string(),
            });
        }

        let Some((entry_id, fields)) = state.entries.get(state.cursor).cloned() else {
            return Ok(None);
        };
        state.cursor += 1;
        state.pending.insert(
            entry_id.clone(),
            PendingEntry {
                consumer: consumer.to_string(),
                deliveries: 1,
                delivered_at: Instant::now(),
            },
        );

        decode(entry_id, &fields, 1).map(Some)
    }
}

fn decode(
    entry_id: String,
    fields: &HashMap<String, String>,
    deliveries: u32,
) -> Result<ClaimedJob, QueueError> {
    let job = Job::from_fields(fields).map_err(|source| QueueError::Malformed {
        entry_id: entry_id.clone(),
        source,
    })?;
    Ok(ClaimedJob {
        entry_id,
        deliveries,
        job,
    })
}

#[async_trait]
impl JobStream for MemoryStream {
    fn name(&self) -> &str {
        &self.name
    }

    async fn ensure_group(&self) -> Result<GroupStatus, QueueError> {
        let mut state = self.state.lock().await;
        if state.group_created {
            return Ok(GroupStatus::AlreadyExists);
        }
        state.group_created = true;
        Ok(GroupStatus::Created)
    }

    async fn claim_next(
        &self,
        consumer: &str,
        block: Duration,
    ) -> Result<Option<ClaimedJob>, QueueError> {
        let deadline = Instant::now() + block;

        loop {
            let notified = self.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().await;
                if let Some(claimed) = self.claim(&mut state, consumer)? {
                    return Ok(Some(claimed));
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn reclaim_idle(
        &self,
        consumer: &str,
        min_idle: Duration,
    ) -> Result<Option<ClaimedJob>, QueueError> {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        let Some(entry_id) = state
            .pending
            .iter()
            .find(|(_, p)| now.duration_since(p.delivered_at) >= min_idle)
            .map(|(id, _)| id.clone())
        else {
            return Ok(None);
        };

        let deliveries = match state.pending.get_mut(&entry_id) {
            Some(pending) => {
                pending.consumer = consumer.to_string();
                pending.deliveries += 1;
                pending.delivered_at = now;
                pending.deliveries
            }
            None => return Ok(None),
        };

        let fields = state
            .entries
            .iter()
            .find(|(id, _)| *id == entry_id)
            .map(|(_, f)| f.clone())
            .unwrap_or_default();

        decode(entry_id, &fields, deliveries).map(Some)
    }

    async fn acknowledge(&self, entry_id: &str) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        if state.fail_acks {
            return Err(QueueError::Connection("injected ack failure".to_string()));
        }
        state.pending.remove(entry_id);
        state.acknowledged.push(entry_id.to_string());
        Ok(())
    }
}

#[async_trait]
impl DeadLetterSink for MemoryStream {
    async fn dead_letter(&self, claimed: &ClaimedJob, reason: &str) -> Result<(), QueueError> {
        self.state
            .lock()
            .await
            .dead_letters
            .push((claimed.entry_id.clone(), reason.to_string()));
        Ok(())
    }
}
