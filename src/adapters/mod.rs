//! Adapter interfaces for external collaborators.
//!
//! The pipeline only knows these traits. Files are the interchange format
//! between stages: a fetcher leaves audio on disk, the transcriber turns it
//! into transcript files, the object store publishes them.

pub mod completion;
pub mod process;
pub mod storage;
pub mod whisperx;
pub mod ytdlp;

use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;

pub use completion::SqliteRecorder;
pub use storage::HttpObjectStore;
pub use whisperx::WhisperX;
pub use ytdlp::YtDlpFetcher;

/// What to download and where to put it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    pub audio: PathBuf,
    /// Also keep the video when set
    pub video: Option<PathBuf>,
}

/// Audio to transcribe and the directory receiving the transcripts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscribeRequest {
    pub audio: PathBuf,
    pub output_dir: PathBuf,
}

/// Downloads source media into local audio (and optionally video) files
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self, request: &FetchRequest) -> Result<()>;
}

/// Produces transcript files from an audio file
#[async_trait]
pub trait Transcriber: Send + Sync {
    fn name(&self) -> &str;

    async fn transcribe(&self, request: &TranscribeRequest) -> Result<()>;
}

/// Publishes a local file under a key
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(&self, path: &Path, key: &str, content_type: &str) -> Result<()>;
}

/// Records that an episode's captions are available
#[async_trait]
pub trait CompletionRecorder: Send + Sync {
    async fn mark_captions_available(&self, episode_id: &str) -> Result<()>;
}
