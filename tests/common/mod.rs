//! Shared fakes for integration tests.
//!
//! Every collaborator writes to one journal so tests can assert on the exact
//! order of side effects, acknowledgment included.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tempfile::TempDir;
use tokio::fs;

use vodscribe::adapters::{
    CompletionRecorder, FetchRequest, MediaFetcher, ObjectStore, TranscribeRequest, Transcriber,
};
use vodscribe::core::{Orchestrator, StageExecutor, StageOptions, Worker, WorkerOptions};
use vodscribe::domain::TranscriptFormat;
use vodscribe::ingest::{ClaimedJob, GroupStatus, JobStream, MemoryStream, QueueError};
use vodscribe::ArtifactLayout;

/// Ordered record of side effects
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    /// Entries that are collaborator calls (everything except acks)
    pub fn calls(&self) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|e| !e.starts_with("ack:"))
            .collect()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }
}

/// Switch that makes a fake fail while set
#[derive(Default)]
pub struct Fault(AtomicBool);

impl Fault {
    pub fn set(&self, on: bool) {
        self.0.store(on, Ordering::SeqCst);
    }

    fn check(&self, what: &str) -> Result<()> {
        if self.0.load(Ordering::SeqCst) {
            anyhow::bail!("injected {} failure", what);
        }
        Ok(())
    }
}

pub struct FakeFetcher {
    journal: Journal,
    pub fault: Fault,
}

#[async_trait]
impl MediaFetcher for FakeFetcher {
    fn name(&self) -> &str {
        "fake-fetch"
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<()> {
        self.journal.push(format!("fetch:{}", request.url));
        self.fault.check("fetch")?;
        fs::write(&request.audio, b"ID3 audio").await?;
        if let Some(video) = &request.video {
            fs::write(video, b"video").await?;
        }
        Ok(())
    }
}

pub struct FakeTranscriber {
    journal: Journal,
    pub fault: Fault,
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    fn name(&self) -> &str {
        "fake-transcribe"
    }

    async fn transcribe(&self, request: &TranscribeRequest) -> Result<()> {
        let stem = request
            .audio
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        self.journal.push(format!("transcribe:{}", stem));
        self.fault.check("transcribe")?;

        for format in TranscriptFormat::ALL {
            let path = request
                .output_dir
                .join(format!("{}.{}", stem, format.extension()));
            fs::write(path, format!("{} transcript", format.extension())).await?;
        }
        Ok(())
    }
}

pub struct FakeStore {
    journal: Journal,
    pub fault: Fault,
}

#[async_trait]
impl ObjectStore for FakeStore {
    async fn upload(&self, path: &Path, key: &str, _content_type: &str) -> Result<()> {
        self.journal.push(format!("upload:{}", key));
        self.fault.check("upload")?;
        fs::metadata(path).await?;
        Ok(())
    }
}

pub struct FakeRecorder {
    journal: Journal,
    pub fault: Fault,
}

#[async_trait]
impl CompletionRecorder for FakeRecorder {
    async fn mark_captions_available(&self, episode_id: &str) -> Result<()> {
        self.journal.push(format!("complete:{}", episode_id));
        self.fault.check("completion")?;
        Ok(())
    }
}

/// Memory stream that journals successful acknowledgments
pub struct JournalStream {
    pub inner: Arc<MemoryStream>,
    journal: Journal,
}

#[async_trait]
impl JobStream for JournalStream {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn ensure_group(&self) -> Result<GroupStatus, QueueError> {
        self.inner.ensure_group().await
    }

    async fn claim_next(
        &self,
        consumer: &str,
        block: Duration,
    ) -> Result<Option<ClaimedJob>, QueueError> {
        self.inner.claim_next(consumer, block).await
    }

    async fn reclaim_idle(
        &self,
        consumer: &str,
        min_idle: Duration,
    ) -> Result<Option<ClaimedJob>, QueueError> {
        self.inner.reclaim_idle(consumer, min_idle).await
    }

    async fn acknowledge(&self, entry_id: &str) -> Result<(), QueueError> {
        self.inner.acknowledge(entry_id).await?;
        self.journal.push(format!("ack:{}", entry_id));
        Ok(())
    }
}

/// A complete pipeline wired to fakes under a temporary directory
pub struct Harness {
    pub temp: TempDir,
    pub layout: ArtifactLayout,
    pub journal: Journal,
    pub memory: Arc<MemoryStream>,
    pub stream: Arc<JournalStream>,
    pub fetcher: Arc<FakeFetcher>,
    pub transcriber: Arc<FakeTranscriber>,
    pub store: Arc<FakeStore>,
    pub recorder: Arc<FakeRecorder>,
}

impl Harness {
    pub async fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let layout = ArtifactLayout::under(temp.path());
        let journal = Journal::default();
        let memory = Arc::new(MemoryStream::default());
        memory.ensure_group().await.unwrap();

        Self {
            layout,
            stream: Arc::new(JournalStream {
                inner: Arc::clone(&memory),
                journal: journal.clone(),
            }),
            memory,
            fetcher: Arc::new(FakeFetcher {
                journal: journal.clone(),
                fault: Fault::default(),
            }),
            transcriber: Arc::new(FakeTranscriber {
                journal: journal.clone(),
                fault: Fault::default(),
            }),
            store: Arc::new(FakeStore {
                journal: journal.clone(),
                fault: Fault::default(),
            }),
            recorder: Arc::new(FakeRecorder {
                journal: journal.clone(),
                fault: Fault::default(),
            }),
            journal,
            temp,
        }
    }

    pub fn executor(&self) -> StageExecutor {
        StageExecutor::new(
            self.layout.clone(),
            self.fetcher.clone(),
            self.transcriber.clone(),
            self.store.clone(),
            StageOptions::default(),
        )
    }

    pub fn orchestrator(&self, cleanup: bool) -> Orchestrator {
        let orchestrator = Orchestrator::new(self.executor(), self.recorder.clone());
        if cleanup {
            orchestrator
        } else {
            orchestrator.keep_artifacts()
        }
    }

    pub fn options(&self) -> WorkerOptions {
        WorkerOptions {
            consumer: "test-worker".to_string(),
            block_timeout: Duration::from_millis(50),
            reclaim_idle: None,
            retry: Default::default(),
        }
    }

    pub fn worker(&self, cleanup: bool, options: WorkerOptions) -> Worker {
        Worker::new(
            self.stream.clone(),
            Arc::new(self.orchestrator(cleanup)),
            options,
        )
    }

    /// Claim the next entry directly from the stream
    pub async fn claim(&self) -> ClaimedJob {
        self.stream
            .claim_next("test-worker", Duration::from_millis(50))
            .await
            .unwrap()
            .expect("an entry to claim")
    }

    /// Number of artifact files on disk for a source reference
    pub fn artifacts_on_disk(&self, source_ref: &str) -> usize {
        self.layout
            .all_artifacts(source_ref)
            .iter()
            .filter(|p| p.exists())
            .count()
    }
}
