//! Worker Loop Integration Tests
//!
//! Claiming, blocking timeouts, malformed entries, redelivery and the retry
//! policy, driven one tick at a time.

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::Harness;
use vodscribe::core::{initialize_group, RetryPolicy, Tick, Worker, WorkerOptions};
use vodscribe::domain::{Job, JobKind};
use vodscribe::ingest::{GroupStatus, JobStream, MemoryStream, QueueError};

fn ep42() -> Job {
    Job::new("ep42", JobKind::YouTube, "abc123")
}

#[tokio::test]
async fn test_empty_stream_times_out_idle() {
    let h = Harness::new().await;
    let worker = h.worker(true, h.options());

    let started = Instant::now();
    let tick = worker.tick().await.unwrap();

    assert_eq!(tick, Tick::Idle);
    assert!(started.elapsed() >= Duration::from_millis(50));
    assert!(h.journal.entries().is_empty());
}

#[tokio::test]
async fn test_blocking_claim_wakes_on_append() {
    let stream = Arc::new(MemoryStream::default());
    stream.ensure_group().await.unwrap();

    let waiter = {
        let stream = Arc::clone(&stream);
        tokio::spawn(async move { stream.claim_next("w", Duration::from_secs(5)).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    let entry_id = stream.push(&ep42()).await;

    let claimed = waiter.await.unwrap().unwrap().expect("claimed after append");
    assert_eq!(claimed.entry_id, entry_id);
    assert_eq!(claimed.deliveries, 1);
}

#[tokio::test]
async fn test_tick_completes_job() {
    let h = Harness::new().await;
    let entry_id = h.memory.push(&ep42()).await;
    let worker = h.worker(true, h.options());

    assert_eq!(worker.tick().await.unwrap(), Tick::Completed { entry_id });
}

#[tokio::test]
async fn test_malformed_entry_is_discarded() {
    let h = Harness::new().await;
    let mut fields = HashMap::new();
    fields.insert("id".to_string(), "ep9".to_string());
    fields.insert("kind".to_string(), "youtube".to_string());
    let entry_id = h.memory.push_fields(fields).await;
    let worker = h.worker(true, h.options());

    assert_eq!(
        worker.tick().await.unwrap(),
        Tick::Discarded {
            entry_id: entry_id.clone()
        }
    );
    assert!(h.journal.calls().is_empty());
    assert_eq!(h.memory.acknowledged().await, vec![entry_id]);
}

#[tokio::test]
async fn test_claim_without_group_is_queue_error() {
    let h = Harness::new().await;
    let stream = Arc::new(MemoryStream::default());
    let worker = Worker::new(stream, Arc::new(h.orchestrator(true)), h.options());

    let err = worker.tick().await.unwrap_err();
    assert!(matches!(err, QueueError::NoGroup { .. }));
}

#[tokio::test]
async fn test_failed_job_is_reclaimed_and_resumed() {
    let h = Harness::new().await;
    let entry_id = h.memory.push(&ep42()).await;
    let worker = h.worker(
        true,
        WorkerOptions {
            reclaim_idle: Some(Duration::ZERO),
            ..h.options()
        },
    );

    h.transcriber.fault.set(true);
    assert_eq!(
        worker.tick().await.unwrap(),
        Tick::Failed {
            entry_id: entry_id.clone(),
            retry_in: Duration::ZERO
        }
    );
    assert_eq!(h.memory.pending_ids().await, vec![entry_id.clone()]);

    h.transcriber.fault.set(false);
    h.journal.clear();
    assert_eq!(
        worker.tick().await.unwrap(),
        Tick::Completed {
            entry_id: entry_id.clone()
        }
    );
    // Audio from the first delivery is reused
    assert!(!h.journal.calls().iter().any(|c| c.starts_with("fetch:")));
    assert!(h.memory.pending_ids().await.is_empty());
}

#[tokio::test]
async fn test_retry_limit_dead_letters_then_acks() {
    let h = Harness::new().await;
    let entry_id = h.memory.push(&ep42()).await;
    let options = WorkerOptions {
        reclaim_idle: Some(Duration::ZERO),
        retry: RetryPolicy {
            max_attempts: Some(2),
            ..Default::default()
        },
        ..h.options()
    };
    let worker = h.worker(true, options).with_dead_letter(h.memory.clone());
    h.fetcher.fault.set(true);

    assert!(matches!(worker.tick().await.unwrap(), Tick::Failed { .. }));
    assert_eq!(
        worker.tick().await.unwrap(),
        Tick::DeadLettered {
            entry_id: entry_id.clone()
        }
    );

    let dead = h.memory.dead_letters().await;
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].0, entry_id);
    assert!(dead[0].1.contains("injected fetch failure"));
    assert_eq!(h.journal.entries().last(), Some(&format!("ack:{}", entry_id)));
}

#[tokio::test]
async fn test_retry_limit_without_sink_keeps_pending() {
    let h = Harness::new().await;
    let entry_id = h.memory.push(&ep42()).await;
    let options = WorkerOptions {
        reclaim_idle: Some(Duration::ZERO),
        retry: RetryPolicy {
            max_attempts: Some(1),
            initial_delay_ms: 10,
            ..Default::default()
        },
        ..h.options()
    };
    let worker = h.worker(true, options);
    h.fetcher.fault.set(true);

    assert_eq!(
        worker.tick().await.unwrap(),
        Tick::Failed {
            entry_id: entry_id.clone(),
            retry_in: Duration::from_millis(10)
        }
    );
    assert_eq!(h.memory.pending_ids().await, vec![entry_id]);
}

#[tokio::test]
async fn test_run_once_returns_after_one_entry() {
    let h = Harness::new().await;
    let first = h.memory.push(&ep42()).await;
    h.memory
        .push(&Job::new("ep43", JobKind::YouTube, "def456"))
        .await;
    let worker = h.worker(true, h.options());

    let tick = tokio::time::timeout(Duration::from_secs(5), worker.run_once())
        .await
        .unwrap();

    assert_eq!(tick, Tick::Completed { entry_id: first });
    assert_eq!(h.memory.acknowledged().await.len(), 1);
}

#[tokio::test]
async fn test_pool_names_consumers() {
    let h = Harness::new().await;
    let orchestrator = Arc::new(h.orchestrator(true));
    let options = WorkerOptions {
        consumer: "gpu-box".to_string(),
        ..h.options()
    };

    let pool = Worker::pool(
        h.stream.clone(),
        None,
        Arc::clone(&orchestrator),
        options.clone(),
        3,
    );
    let names: Vec<&str> = pool.iter().map(|w| w.consumer()).collect();
    assert_eq!(names, vec!["gpu-box-1", "gpu-box-2", "gpu-box-3"]);

    let single = Worker::pool(h.stream.clone(), None, orchestrator, options, 1);
    assert_eq!(single[0].consumer(), "gpu-box");
}

#[tokio::test]
async fn test_initialize_group_is_repeatable() {
    let stream = MemoryStream::default();

    assert_eq!(
        initialize_group(&stream, Duration::from_millis(10)).await,
        GroupStatus::Created
    );
    assert_eq!(
        initialize_group(&stream, Duration::from_millis(10)).await,
        GroupStatus::AlreadyExists
    );
}
