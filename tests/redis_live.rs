//! Redis Backend Integration Tests
//!
//! Run against a real server with
//! `REDIS_URL=redis://127.0.0.1:6379 cargo test --test redis_live -- --ignored`.
//! Every test works on its own uniquely named stream.

use std::time::{Duration, Instant};

use uuid::Uuid;
use vodscribe::config::RedisSettings;
use vodscribe::domain::{Job, JobKind};
use vodscribe::ingest::{GroupStatus, JobStream, QueueError, RedisStream};

async fn connect() -> RedisStream {
    let settings = RedisSettings {
        url: Some(
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
        ),
        stream: format!("vodscribe-test-{}", Uuid::new_v4()),
        group: "transcribers".to_string(),
        ..Default::default()
    };
    RedisStream::connect(&settings).await.unwrap()
}

#[tokio::test]
#[ignore = "needs a Redis server"]
async fn test_group_creation_is_repeatable() {
    let stream = connect().await;

    assert_eq!(stream.ensure_group().await.unwrap(), GroupStatus::Created);
    assert_eq!(stream.ensure_group().await.unwrap(), GroupStatus::AlreadyExists);
}

#[tokio::test]
#[ignore = "needs a Redis server"]
async fn test_claim_without_group_is_missing_group() {
    let stream = connect().await;
    stream
        .enqueue(&Job::new("ep42", JobKind::YouTube, "abc123"))
        .await
        .unwrap();

    let err = stream
        .claim_next("w", Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::NoGroup { .. }));
}

#[tokio::test]
#[ignore = "needs a Redis server"]
async fn test_empty_claim_times_out() {
    let stream = connect().await;
    stream.ensure_group().await.unwrap();

    let started = Instant::now();
    let claimed = tokio::time::timeout(
        Duration::from_secs(5),
        stream.claim_next("w", Duration::from_millis(100)),
    )
    .await
    .unwrap()
    .unwrap();

    assert!(claimed.is_none());
    assert!(started.elapsed() >= Duration::from_millis(100));
}

#[tokio::test]
#[ignore = "needs a Redis server"]
async fn test_zero_block_still_returns() {
    let stream = connect().await;
    stream.ensure_group().await.unwrap();

    let claimed = tokio::time::timeout(
        Duration::from_secs(5),
        stream.claim_next("w", Duration::ZERO),
    )
    .await
    .expect("claim returned instead of blocking forever")
    .unwrap();
    assert!(claimed.is_none());
}

#[tokio::test]
#[ignore = "needs a Redis server"]
async fn test_enqueue_claim_acknowledge() {
    let stream = connect().await;
    stream.ensure_group().await.unwrap();
    let job = Job::new("ep42", JobKind::YouTube, "abc123");
    let entry_id = stream.enqueue(&job).await.unwrap();

    let claimed = stream
        .claim_next("w", Duration::from_millis(100))
        .await
        .unwrap()
        .expect("an entry to claim");
    assert_eq!(claimed.entry_id, entry_id);
    assert_eq!(claimed.deliveries, 1);
    assert_eq!(claimed.job, job);

    let pending = stream.pending().await.unwrap();
    assert_eq!(pending.count, 1);
    assert_eq!(pending.consumers, vec![("w".to_string(), 1)]);

    stream.acknowledge(&entry_id).await.unwrap();
    assert_eq!(stream.pending().await.unwrap().count, 0);
}

#[tokio::test]
#[ignore = "needs a Redis server"]
async fn test_idle_entry_is_reclaimed_with_delivery_count() {
    let stream = connect().await;
    stream.ensure_group().await.unwrap();
    let entry_id = stream
        .enqueue(&Job::new("ep42", JobKind::YouTube, "abc123"))
        .await
        .unwrap();
    stream
        .claim_next("first", Duration::from_millis(100))
        .await
        .unwrap()
        .expect("an entry to claim");

    let reclaimed = stream
        .reclaim_idle("second", Duration::ZERO)
        .await
        .unwrap()
        .expect("an idle entry");
    assert_eq!(reclaimed.entry_id, entry_id);
    assert_eq!(reclaimed.deliveries, 2);
}
