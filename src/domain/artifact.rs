//! On-disk layout of stage artifacts.
//!
//! Every path is derived from the job's source reference alone, so a
//! restarted worker finds the outputs of earlier attempts where it left them.
//! Presence of a file is the only completion signal.

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Transcript formats written by one transcription run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptFormat {
    Txt,
    Json,
    Vtt,
    Srt,
    Tsv,
}

impl TranscriptFormat {
    /// Every format the transcriber produces
    pub const ALL: [TranscriptFormat; 5] = [
        TranscriptFormat::Txt,
        TranscriptFormat::Json,
        TranscriptFormat::Vtt,
        TranscriptFormat::Srt,
        TranscriptFormat::Tsv,
    ];

    pub fn extension(self) -> &'static str {
        match self {
            Self::Txt => "txt",
            Self::Json => "json",
            Self::Vtt => "vtt",
            Self::Srt => "srt",
            Self::Tsv => "tsv",
        }
    }

    /// MIME type used when publishing
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Txt => "text/plain; charset=utf-8",
            Self::Json => "application/json",
            Self::Vtt => "text/vtt",
            Self::Srt => "application/x-subrip",
            Self::Tsv => "text/tab-separated-values",
        }
    }
}

/// Directory layout for all artifacts, keyed by source reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLayout {
    pub audio_dir: PathBuf,
    pub video_dir: PathBuf,
    pub transcript_dir: PathBuf,
    pub receipt_dir: PathBuf,
}

impl ArtifactLayout {
    /// Standard layout below a single root directory
    pub fn under(root: &Path) -> Self {
        Self {
            audio_dir: root.join("audio"),
            video_dir: root.join("video"),
            transcript_dir: root.join("transcribed"),
            receipt_dir: root.join("receipts"),
        }
    }

    pub fn audio(&self, source_ref: &str) -> PathBuf {
        self.audio_dir.join(format!("{}.mp3", source_ref))
    }

    pub fn video(&self, source_ref: &str) -> PathBuf {
        self.video_dir.join(format!("{}.mp4", source_ref))
    }

    pub fn transcript(&self, source_ref: &str, format: TranscriptFormat) -> PathBuf {
        self.transcript_dir
            .join(format!("{}.{}", source_ref, format.extension()))
    }

    /// All transcript siblings produced by one transcription run
    pub fn transcripts(&self, source_ref: &str) -> Vec<PathBuf> {
        TranscriptFormat::ALL
            .iter()
            .map(|f| self.transcript(source_ref, *f))
            .collect()
    }

    /// Marker written once a transcript format has been uploaded
    pub fn receipt(&self, source_ref: &str, format: TranscriptFormat) -> PathBuf {
        self.receipt_dir
            .join(format!("{}.{}.uploaded", source_ref, format.extension()))
    }

    /// Temporary sibling a file is written to before being renamed into place
    pub fn staging(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    }

    /// Every path the pipeline may create for a source reference
    pub fn all_artifacts(&self, source_ref: &str) -> Vec<PathBuf> {
        let mut paths = vec![self.audio(source_ref), self.video(source_ref)];
        paths.extend(self.transcripts(source_ref));
        for format in TranscriptFormat::ALL {
            let receipt = self.receipt(source_ref, format);
            paths.push(Self::staging(&receipt));
            paths.push(receipt);
        }
        paths
    }

    /// Delete every artifact of a source reference.
    ///
    /// Files that are already gone are not an error, so cleanup can be
    /// repeated after a crash part way through. Returns the number of files
    /// actually removed.
    pub async fn cleanup(&self, source_ref: &str) -> io::Result<usize> {
        let mut removed = 0;
        for path in self.all_artifacts(source_ref) {
            if remove_if_exists(&path).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Remove a file, treating absence as success
pub async fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// True when every path exists
pub fn all_exist<P: AsRef<Path>>(paths: &[P]) -> bool {
    paths.iter().all(|p| p.as_ref().exists())
}
