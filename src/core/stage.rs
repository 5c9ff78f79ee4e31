//! Stage execution with skip-if-present idempotency.
//!
//! Each stage owns a fixed set of output files derived from the job's source
//! reference. If all of them exist the stage is done and the collaborator is
//! not invoked. Existence is trusted as-is: a file left truncated by a crashed
//! collaborator counts as complete, and the executor never deletes partial
//! output after a failure.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, info};

use crate::adapters::{FetchRequest, MediaFetcher, ObjectStore, TranscribeRequest, Transcriber};
use crate::domain::artifact::all_exist;
use crate::domain::{ArtifactLayout, Job, Stage, StageOutcome, TranscriptFormat};

/// Stage behaviour that comes from configuration
#[derive(Debug, Clone)]
pub struct StageOptions {
    /// Fetch keeps the video next to the audio
    pub keep_video: bool,
    /// Formats uploaded by the publish stage
    pub publish_formats: Vec<TranscriptFormat>,
    /// Objects are stored as `{key_prefix}/{episode}.{ext}`
    pub key_prefix: String,
}

impl Default for StageOptions {
    fn default() -> Self {
        Self {
            keep_video: false,
            publish_formats: vec![
                TranscriptFormat::Vtt,
                TranscriptFormat::Srt,
                TranscriptFormat::Json,
                TranscriptFormat::Txt,
            ],
            key_prefix: "captions".to_string(),
        }
    }
}

/// Runs one pipeline stage at a time
pub struct StageExecutor {
    layout: ArtifactLayout,
    fetcher: Arc<dyn MediaFetcher>,
    transcriber: Arc<dyn Transcriber>,
    store: Arc<dyn ObjectStore>,
    options: StageOptions,
}

impl StageExecutor {
    pub fn new(
        layout: ArtifactLayout,
        fetcher: Arc<dyn MediaFetcher>,
        transcriber: Arc<dyn Transcriber>,
        store: Arc<dyn ObjectStore>,
        options: StageOptions,
    ) -> Self {
        Self {
            layout,
            fetcher,
            transcriber,
            store,
            options,
        }
    }

    pub fn layout(&self) -> &ArtifactLayout {
        &self.layout
    }

    /// Canonical outputs of a stage for a job
    pub fn outputs(&self, stage: Stage, job: &Job) -> Vec<PathBuf> {
        let source = &job.source_ref;
        match stage {
            Stage::Fetch => {
                let mut paths = vec![self.layout.audio(source)];
                if self.options.keep_video {
                    paths.push(self.layout.video(source));
                }
                paths
            }
            Stage::Transcribe => self.layout.transcripts(source),
            Stage::Publish => self
                .options
                .publish_formats
                .iter()
                .map(|f| self.layout.receipt(source, *f))
                .collect(),
        }
    }

    /// True when every output of the stage is on disk.
    ///
    /// Receipts are shared by every episode with the same source reference,
    /// so a publish receipt only counts when it names this job's object key.
    pub async fn is_complete(&self, stage: Stage, job: &Job) -> bool {
        match stage {
            Stage::Publish => {
                for format in &self.options.publish_formats {
                    if !self.is_published(job, *format).await {
                        return false;
                    }
                }
                true
            }
            _ => all_exist(&self.outputs(stage, job)),
        }
    }

    /// A receipt exists for the format and records this job's key
    async fn is_published(&self, job: &Job, format: TranscriptFormat) -> bool {
        let receipt = self.layout.receipt(&job.source_ref, format);
        match fs::read_to_string(&receipt).await {
            Ok(content) => content.lines().next() == Some(self.object_key(job, format).as_str()),
            Err(_) => false,
        }
    }

    /// Object key a transcript format is published under
    pub fn object_key(&self, job: &Job, format: TranscriptFormat) -> String {
        format!(
            "{}/{}.{}",
            self.options.key_prefix.trim_end_matches('/'),
            job.episode_id,
            format.extension()
        )
    }

    /// Run a stage unless its outputs already exist
    pub async fn run(&self, stage: Stage, job: &Job) -> Result<StageOutcome> {
        if self.is_complete(stage, job).await {
            info!(%stage, vod = %job.source_ref, "Output present, skipping stage");
            return Ok(StageOutcome::Skipped);
        }

        match stage {
            Stage::Fetch => self.fetch(job).await?,
            Stage::Transcribe => self.transcribe(job).await?,
            Stage::Publish => self.publish(job).await?,
        }

        Ok(StageOutcome::Ran)
    }

    async fn fetch(&self, job: &Job) -> Result<()> {
        let url = job
            .kind
            .media_url(&job.source_ref)
            .with_context(|| format!("No media source for kind '{}'", job.kind))?;

        ensure_dir(&self.layout.audio_dir).await?;
        let video = if self.options.keep_video {
            ensure_dir(&self.layout.video_dir).await?;
            Some(self.layout.video(&job.source_ref))
        } else {
            None
        };

        let request = FetchRequest {
            url,
            audio: self.layout.audio(&job.source_ref),
            video,
        };
        self.fetcher
            .fetch(&request)
            .await
            .with_context(|| format!("{} failed for {}", self.fetcher.name(), job.source_ref))?;

        self.require_outputs(Stage::Fetch, job, self.fetcher.name())
    }

    async fn transcribe(&self, job: &Job) -> Result<()> {
        let audio = self.layout.audio(&job.source_ref);
        if !audio.exists() {
            anyhow::bail!("Audio for {} is missing: {}", job.source_ref, audio.display());
        }

        ensure_dir(&self.layout.transcript_dir).await?;
        let request = TranscribeRequest {
            audio,
            output_dir: self.layout.transcript_dir.clone(),
        };
        self.transcriber
            .transcribe(&request)
            .await
            .with_context(|| {
                format!("{} failed for {}", self.transcriber.name(), job.source_ref)
            })?;

        self.require_outputs(Stage::Transcribe, job, self.transcriber.name())
    }

    async fn publish(&self, job: &Job) -> Result<()> {
        ensure_dir(&self.layout.receipt_dir).await?;

        for format in &self.options.publish_formats {
            if self.is_published(job, *format).await {
                debug!(vod = %job.source_ref, format = format.extension(), "Already published");
                continue;
            }
            let receipt = self.layout.receipt(&job.source_ref, *format);

            let path = self.layout.transcript(&job.source_ref, *format);
            let bytes = fs::read(&path)
                .await
                .with_context(|| format!("Transcript missing: {}", path.display()))?;
            let key = self.object_key(job, *format);

            self.store
                .upload(&path, &key, format.content_type())
                .await
                .with_context(|| format!("Failed to publish {}", key))?;

            let digest = format!("{:x}", Sha256::digest(&bytes));
            write_receipt(&receipt, &format!("{}\n{}\n", key, digest)).await?;
            info!(key = %key, "Published transcript");
        }

        Ok(())
    }

    fn require_outputs(&self, stage: Stage, job: &Job, tool: &str) -> Result<()> {
        let missing: Vec<PathBuf> = self
            .outputs(stage, job)
            .into_iter()
            .filter(|p| !p.exists())
            .collect();

        if let Some(first) = missing.first() {
            anyhow::bail!(
                "{} reported success but {} output(s) are missing, first: {}",
                tool,
                missing.len(),
                first.display()
            );
        }
        Ok(())
    }
}

async fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create directory: {}", dir.display()))
}

/// Write a receipt via rename so a crash never leaves a half-written one
async fn write_receipt(path: &Path, content: &str) -> Result<()> {
    let tmp = ArtifactLayout::staging(path);
    fs::write(&tmp, content)
        .await
        .with_context(|| format!("Failed to write receipt: {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to finalize receipt: {}", path.display()))
}
