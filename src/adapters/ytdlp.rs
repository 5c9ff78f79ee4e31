//! Media fetcher backed by `yt-dlp`.
//!
//! yt-dlp downloads the source and hands the audio to ffmpeg for the mp3
//! transcode, so both binaries must be on the PATH.

use std::ffi::OsString;
use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use tokio::process::Command;
use tracing::info;

use crate::config::FetchSettings;

use super::process::run_tool;
use super::{FetchRequest, MediaFetcher};

pub struct YtDlpFetcher {
    settings: FetchSettings,
}

impl YtDlpFetcher {
    pub fn new(settings: FetchSettings) -> Self {
        Self { settings }
    }

    /// Arguments for the audio download
    pub fn audio_args(&self, url: &str, audio: &Path) -> Vec<OsString> {
        vec![
            "--no-playlist".into(),
            "--newline".into(),
            "-f".into(),
            self.settings.quality.clone().into(),
            "--extract-audio".into(),
            "--audio-format".into(),
            "mp3".into(),
            "--audio-quality".into(),
            self.settings.audio_bitrate.clone().into(),
            "-o".into(),
            output_template(audio),
            url.into(),
        ]
    }

    /// Arguments for the optional video download
    pub fn video_args(&self, url: &str, video: &Path) -> Vec<OsString> {
        vec![
            "--no-playlist".into(),
            "--newline".into(),
            "-f".into(),
            self.settings.video_format.clone().into(),
            "--merge-output-format".into(),
            "mp4".into(),
            "-o".into(),
            output_template(video),
            url.into(),
        ]
    }

    async fn download(&self, args: Vec<OsString>) -> Result<()> {
        let mut command = Command::new(&self.settings.binary);
        command.args(args);
        run_tool(&self.settings.binary, command).await
    }
}

/// `dir/name.%(ext)s` so yt-dlp picks the final extension itself
fn output_template(target: &Path) -> OsString {
    let mut template = target.with_extension("").into_os_string();
    template.push(".%(ext)s");
    template
}

#[async_trait]
impl MediaFetcher for YtDlpFetcher {
    fn name(&self) -> &str {
        "yt-dlp"
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<()> {
        info!(url = %request.url, "Downloading audio");
        self.download(self.audio_args(&request.url, &request.audio))
            .await?;

        if let Some(video) = &request.video {
            info!(url = %request.url, "Downloading video");
            self.download(self.video_args(&request.url, video)).await?;
        }

        Ok(())
    }
}
