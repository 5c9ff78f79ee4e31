//! Transcription jobs as they arrive on the stream.
//!
//! The upstream producer appends entries with three fields: `id` (episode),
//! `kind` (where the media lives) and `vod` (the source reference).

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

/// Field names fixed by the producer contract
pub const FIELD_EPISODE: &str = "id";
pub const FIELD_KIND: &str = "kind";
pub const FIELD_SOURCE: &str = "vod";

/// Errors raised while decoding a stream entry into a job
#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobError {
    #[error("missing or empty field '{0}'")]
    MissingField(&'static str),

    /// The source reference names local files, so it must be a plain name
    #[error("source reference '{0}' is not a plain file name")]
    InvalidSource(String),
}

/// Media origin of a job.
///
/// Crosses the wire only through [`JobKind::parse`] and [`JobKind::as_str`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JobKind {
    /// YouTube video id
    YouTube,

    /// Twitch VOD id
    Twitch,

    /// Anything this worker version does not know how to process
    Unsupported(String),
}

impl JobKind {
    /// Parse the wire value of the `kind` field
    pub fn parse(value: &str) -> Self {
        match value {
            "youtube" => Self::YouTube,
            "twitch" => Self::Twitch,
            other => Self::Unsupported(other.to_string()),
        }
    }

    /// Wire value of this kind
    pub fn as_str(&self) -> &str {
        match self {
            Self::YouTube => "youtube",
            Self::Twitch => "twitch",
            Self::Unsupported(raw) => raw,
        }
    }

    /// URL the fetcher should download for a source reference.
    ///
    /// `None` means the kind has no pipeline variant and the job is ignored.
    pub fn media_url(&self, source_ref: &str) -> Option<String> {
        match self {
            Self::YouTube => Some(format!("https://www.youtube.com/watch?v={}", source_ref)),
            Self::Twitch => Some(format!("https://www.twitch.tv/videos/{}", source_ref)),
            Self::Unsupported(_) => None,
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Unsupported(_))
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work read from the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// Identifier used by downstream systems (publication keys, completion record)
    pub episode_id: String,

    /// Pipeline variant
    pub kind: JobKind,

    /// Source media reference; names every local artifact of the job
    pub source_ref: String,
}

impl Job {
    pub fn new(
        episode_id: impl Into<String>,
        kind: JobKind,
        source_ref: impl Into<String>,
    ) -> Self {
        Self {
            episode_id: episode_id.into(),
            kind,
            source_ref: source_ref.into(),
        }
    }

    /// Decode a job from stream entry fields.
    ///
    /// A missing `kind` decodes as an unsupported kind so the entry is
    /// acknowledged and skipped rather than retried forever.
    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self, JobError> {
        let required = |name: &'static str| {
            fields
                .get(name)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or(JobError::MissingField(name))
        };

        let episode_id = required(FIELD_EPISODE)?;
        let source_ref = required(FIELD_SOURCE)?;
        // '%' would be expanded as a field of yt-dlp's output template
        if source_ref.starts_with('.') || source_ref.contains(['/', '\\', '\0', '%']) {
            return Err(JobError::InvalidSource(source_ref));
        }
        let kind = JobKind::parse(fields.get(FIELD_KIND).map(|k| k.trim()).unwrap_or(""));

        Ok(Self {
            episode_id,
            kind,
            source_ref,
        })
    }

    /// Encode as stream entry fields
    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            (FIELD_EPISODE, self.episode_id.clone()),
            (FIELD_KIND, self.kind.as_str().to_string()),
            (FIELD_SOURCE, self.source_ref.clone()),
        ]
    }
}
