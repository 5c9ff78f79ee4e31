//! Transcriber backed by the `whisperx` CLI.
//!
//! One run writes every transcript format (`--output_format all`) next to
//! each other in the output directory, named after the audio file's stem.

use std::ffi::OsString;

use anyhow::Result;
use async_trait::async_trait;
use tokio::process::Command;
use tracing::info;

use crate::config::TranscribeSettings;

use super::process::run_tool;
use super::{TranscribeRequest, Transcriber};

pub struct WhisperX {
    settings: TranscribeSettings,
}

impl WhisperX {
    pub fn new(settings: TranscribeSettings) -> Self {
        Self { settings }
    }

    /// Full argument list for one transcription run.
    ///
    /// Fails when diarization is requested without an access token for the
    /// gated diarization model.
    pub fn args(&self, request: &TranscribeRequest) -> Result<Vec<OsString>> {
        let s = &self.settings;

        let mut args: Vec<OsString> = vec![
            request.audio.clone().into_os_string(),
            "--output_format".into(),
            "all".into(),
            "--output_dir".into(),
            request.output_dir.clone().into_os_string(),
            "--model".into(),
            s.model.clone().into(),
            "--device".into(),
            s.device.clone().into(),
        ];

        if let Some(compute_type) = &s.compute_type {
            args.push("--compute_type".into());
            args.push(compute_type.into());
        }

        if s.diarize {
            let token = s
                .hf_token
                .as_deref()
                .filter(|t| !t.is_empty())
                .ok_or_else(|| anyhow::anyhow!("HF_TOKEN is required for diarization"))?;
            args.push("--diarize".into());
            args.push("--hf_token".into());
            args.push(token.into());
        }

        args.extend([
            "--highlight_words".into(),
            "True".into(),
            "--language".into(),
            s.language.clone().into(),
            "--print_progress".into(),
            "True".into(),
            "--threads".into(),
            s.threads.to_string().into(),
        ]);

        Ok(args)
    }
}

#[async_trait]
impl Transcriber for WhisperX {
    fn name(&self) -> &str {
        "whisperx"
    }

    async fn transcribe(&self, request: &TranscribeRequest) -> Result<()> {
        let args = self.args(request)?;
        info!(
            audio = %request.audio.display(),
            model = %self.settings.model,
            device = %self.settings.device,
            "Starting transcription"
        );

        let mut command = Command::new(&self.settings.binary);
        command.args(args);
        run_tool(&self.settings.binary, command).await
    }
}
