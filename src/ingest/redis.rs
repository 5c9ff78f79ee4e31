//! Redis streams backend.
//!
//! Jobs are entries of one stream read through one consumer group:
//! `XREADGROUP ... COUNT 1 BLOCK ms STREAMS <key> >` claims, `XACK` acknowledges.
//! Blocking reads hold their connection until they return, so every consumer
//! gets its own connection for them; short commands share a second one.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::streams::{
    StreamAutoClaimReply, StreamId, StreamInfoGroupsReply, StreamPendingCountReply,
    StreamPendingReply, StreamReadOptions, StreamReadReply,
};
use redis::{AsyncCommands, Client, ConnectionAddr, ConnectionInfo, RedisConnectionInfo, RedisError};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::RedisSettings;
use crate::domain::Job;

use super::stream::{ClaimedJob, DeadLetterSink, GroupStatus, JobStream, QueueError};

impl From<RedisError> for QueueError {
    fn from(e: RedisError) -> Self {
        if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
            QueueError::Connection(e.to_string())
        } else {
            QueueError::Command(e.to_string())
        }
    }
}

/// Pending-entries summary for one group
#[derive(Debug, Clone, Default, Serialize)]
pub struct PendingSummary {
    pub count: usize,
    pub oldest: Option<String>,
    pub newest: Option<String>,
    /// (consumer, pending entries)
    pub consumers: Vec<(String, usize)>,
}

/// Job stream backed by a Redis stream and consumer group
pub struct RedisStream {
    client: Client,
    stream: String,
    group: String,
    dead_letter_stream: Option<String>,
    commands: MultiplexedConnection,
    blocking: Mutex<HashMap<String, MultiplexedConnection>>,
}

impl RedisStream {
    /// Connect using resolved settings
    pub async fn connect(settings: &RedisSettings) -> Result<Self, QueueError> {
        let client = match &settings.url {
            Some(url) => Client::open(url.as_str())?,
            None => Client::open(ConnectionInfo {
                addr: ConnectionAddr::Tcp(settings.host.clone(), settings.port),
                redis: RedisConnectionInfo {
                    username: settings.username.clone(),
                    password: settings.password.clone(),
                    ..Default::default()
                },
            })?,
        };

        let commands = client.get_multiplexed_async_connection().await?;
        info!(stream = %settings.stream, group = %settings.group, "Connected to Redis");

        Ok(Self {
            client,
            stream: settings.stream.clone(),
            group: settings.group.clone(),
            dead_letter_stream: settings.dead_letter_stream.clone(),
            commands,
            blocking: Mutex::new(HashMap::new()),
        })
    }

    /// Connection reserved for one consumer's blocking reads
    async fn blocking_connection(&self, consumer: &str) -> Result<MultiplexedConnection, QueueError> {
        let mut conns = self.blocking.lock().await;
        if let Some(con) = conns.get(consumer) {
            return Ok(con.clone());
        }

        let con = self.client.get_multiplexed_async_connection().await?;
        conns.insert(consumer.to_string(), con.clone());
        Ok(con)
    }

    /// Drop a consumer's blocking connection after an error so the next
    /// claim reconnects
    async fn forget_connection(&self, consumer: &str) {
        self.blocking.lock().await.remove(consumer);
    }

    fn map_group_error(&self, e: RedisError) -> QueueError {
        group_error(e, &self.stream, &self.group)
    }

    /// Append a job to the stream (`XADD`), returning its entry id
    pub async fn enqueue(&self, job: &Job) -> Result<String, QueueError> {
        let mut con = self.commands.clone();
        let id: String = con.xadd(&self.stream, "*", &job.to_fields()).await?;
        Ok(id)
    }

    /// Summarize delivered-but-unacknowledged entries (`XPENDING`)
    pub async fn pending(&self) -> Result<PendingSummary, QueueError> {
        let mut con = self.commands.clone();
        let reply: StreamPendingReply = con
            .xpending(&self.stream, &self.group)
            .await
            .map_err(|e| self.map_group_error(e))?;

        Ok(match reply {
            StreamPendingReply::Empty => PendingSummary::default(),
            StreamPendingReply::Data(data) => PendingSummary {
                count: data.count,
                oldest: Some(data.start_id),
                newest: Some(data.end_id),
                consumers: data
                    .consumers
                    .into_iter()
                    .map(|c| (c.name, c.pending))
                    .collect(),
            },
        })
    }

    pub fn group(&self) -> &str {
        &self.group
    }
}

/// Options for claiming one new entry.
///
/// `BLOCK 0` waits forever, so the timeout is never sent below 1 ms.
fn read_options(group: &str, consumer: &str, block: Duration) -> StreamReadOptions {
    let millis = usize::try_from(block.as_millis()).unwrap_or(usize::MAX);
    StreamReadOptions::default()
        .group(group, consumer)
        .count(1)
        .block(millis.max(1))
}

fn decode_entry(entry: &StreamId, deliveries: u32) -> Result<ClaimedJob, QueueError> {
    // Nil and non-UTF-8 values decode as absent fields
    let fields: HashMap<String, String> = entry
        .map
        .iter()
        .filter_map(|(k, v)| {
            redis::from_redis_value::<String>(v)
                .ok()
                .map(|s| (k.clone(), s))
        })
        .collect();

    let job = Job::from_fields(&fields).map_err(|source| QueueError::Malformed {
        entry_id: entry.id.clone(),
        source,
    })?;

    Ok(ClaimedJob {
        entry_id: entry.id.clone(),
        deliveries,
        job,
    })
}

fn group_error(e: RedisError, stream: &str, group: &str) -> QueueError {
    if e.code() == Some("NOGROUP") {
        QueueError::NoGroup {
            stream: stream.to_string(),
            group: group.to_string(),
        }
    } else {
        e.into()
    }
}

fn group_created(created: Result<(), RedisError>) -> Result<GroupStatus, QueueError> {
    match created {
        Ok(()) => Ok(GroupStatus::Created),
        // Another worker created it between our check and create
        Err(e) if e.code() == Some("BUSYGROUP") => Ok(GroupStatus::AlreadyExists),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl JobStream for RedisStream {
    fn name(&self) -> &str {
        &self.stream
    }

    async fn ensure_group(&self) -> Result<GroupStatus, QueueError> {
        let mut con = self.commands.clone();

        let exists: bool = con.exists(&self.stream).await?;
        if exists {
            let groups: StreamInfoGroupsReply = con.xinfo_groups(&self.stream).await?;
            if groups.groups.iter().any(|g| g.name == self.group) {
                return Ok(GroupStatus::AlreadyExists);
            }
        }

        let created: Result<(), RedisError> = con
            .xgroup_create_mkstream(&self.stream, &self.group, "0")
            .await;
        group_created(created)
    }

    async fn claim_next(
        &self,
        consumer: &str,
        block: Duration,
    ) -> Result<Option<ClaimedJob>, QueueError> {
        let mut con = self.blocking_connection(consumer).await?;
        let options = read_options(&self.group, consumer, block);

        let reply: Option<StreamReadReply> =
            match con.xread_options(&[&self.stream], &[">"], &options).await {
                Ok(reply) => reply,
                Err(e) => {
                    self.forget_connection(consumer).await;
                    return Err(self.map_group_error(e));
                }
            };

        let entry = reply
            .and_then(|r| r.keys.into_iter().next())
            .and_then(|k| k.ids.into_iter().next());

        match entry {
            Some(entry) => {
                debug!(entry_id = %entry.id, consumer, "Claimed entry");
                decode_entry(&entry, 1).map(Some)
            }
            None => Ok(None),
        }
    }

    async fn reclaim_idle(
        &self,
        consumer: &str,
        min_idle: Duration,
    ) -> Result<Option<ClaimedJob>, QueueError> {
        let mut con = self.commands.clone();
        let reply: StreamAutoClaimReply = redis::cmd("XAUTOCLAIM")
            .arg(&self.stream)
            .arg(&self.group)
            .arg(consumer)
            .arg(min_idle.as_millis() as u64)
            .arg("0-0")
            .arg("COUNT")
            .arg(1)
            .query_async(&mut con)
            .await
            .map_err(|e| self.map_group_error(e))?;

        let Some(entry) = reply.claimed.into_iter().next() else {
            return Ok(None);
        };

        let pending: StreamPendingCountReply = con
            .xpending_count(&self.stream, &self.group, &entry.id, &entry.id, 1)
            .await?;
        let deliveries = pending
            .ids
            .first()
            .map(|p| p.times_delivered as u32)
            .unwrap_or(1);

        debug!(entry_id = %entry.id, consumer, deliveries, "Reclaimed idle entry");
        decode_entry(&entry, deliveries).map(Some)
    }

    async fn acknowledge(&self, entry_id: &str) -> Result<(), QueueError> {
        let mut con = self.commands.clone();
        let _: i64 = con.xack(&self.stream, &self.group, &[entry_id]).await?;
        Ok(())
    }
}

#[async_trait]
impl DeadLetterSink for RedisStream {
    async fn dead_letter(&self, claimed: &ClaimedJob, reason: &str) -> Result<(), QueueError> {
        let Some(target) = &self.dead_letter_stream else {
            return Err(QueueError::Command(
                "no dead-letter stream configured".to_string(),
            ));
        };

        let mut fields = claimed
            .job
            .to_fields()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect::<Vec<_>>();
        fields.push(("entry".to_string(), claimed.entry_id.clone()));
        fields.push(("deliveries".to_string(), claimed.deliveries.to_string()));
        fields.push(("reason".to_string(), reason.to_string()));

        let mut con = self.commands.clone();
        let _: String = con.xadd(target, "*", &fields).await?;
        Ok(())
    }
}
