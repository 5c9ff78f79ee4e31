//! Configuration for the worker.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (REDIS_*, HF_TOKEN, STORAGE_TOKEN, VODSCRIBE_ROOT)
//! 2. Config file (`--config`, else `.vodscribe/config.yaml` in the current
//!    directory or a parent, else `~/.config/vodscribe/config.yaml`)
//! 3. Defaults
//!
//! Relative paths in a config file are resolved against the project root
//! (the directory holding `.vodscribe/`) or the file's own directory.
//! The resolved configuration is built once in `main` and passed down.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::RetryPolicy;
use crate::domain::{ArtifactLayout, TranscriptFormat};

const CONFIG_DIR: &str = ".vodscribe";
const CONFIG_NAME: &str = "config.yaml";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub redis: RedisSettings,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub fetch: FetchSettings,
    #[serde(default)]
    pub transcribe: TranscribeSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub worker: WorkerSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisSettings {
    /// Full connection URL; takes precedence over host/port/credentials
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub stream: String,
    pub group: String,
    /// Stream receiving jobs the retry policy gives up on
    pub dead_letter_stream: Option<String>,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            url: None,
            host: "127.0.0.1".to_string(),
            port: 6379,
            username: None,
            password: None,
            stream: "vods".to_string(),
            group: "transcribers".to_string(),
            dead_letter_stream: None,
        }
    }
}

/// Artifact directories; subdirectories default to the standard layout
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub root: Option<String>,
    pub audio: Option<String>,
    pub video: Option<String>,
    pub transcripts: Option<String>,
    pub receipts: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    pub binary: String,
    /// yt-dlp format selector for the audio download
    pub quality: String,
    pub audio_bitrate: String,
    /// Also download and keep the video
    pub keep_video: bool,
    pub video_format: String,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            binary: "yt-dlp".to_string(),
            quality: "bestaudio".to_string(),
            audio_bitrate: "128K".to_string(),
            keep_video: false,
            video_format: "bestvideo[ext=mp4]+bestaudio/best".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscribeSettings {
    pub binary: String,
    pub model: String,
    pub device: String,
    pub compute_type: Option<String>,
    pub threads: u32,
    pub language: String,
    pub diarize: bool,
    /// Access token for the gated diarization model
    pub hf_token: Option<String>,
}

impl Default for TranscribeSettings {
    fn default() -> Self {
        Self {
            binary: "whisperx".to_string(),
            model: "medium".to_string(),
            device: "cuda".to_string(),
            compute_type: None,
            threads: 12,
            language: "en".to_string(),
            diarize: true,
            hf_token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub endpoint: String,
    pub bucket: String,
    pub token: Option<String>,
    /// Objects are stored as `{key_prefix}/{episode}.{ext}`
    pub key_prefix: String,
    /// Transcript formats to publish
    pub formats: Vec<TranscriptFormat>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:9000".to_string(),
            bucket: "transcripts".to_string(),
            token: None,
            key_prefix: "captions".to_string(),
            formats: vec![
                TranscriptFormat::Vtt,
                TranscriptFormat::Srt,
                TranscriptFormat::Json,
                TranscriptFormat::Txt,
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub path: PathBuf,
    pub table: String,
    pub column: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("episodes.db"),
            table: "episodes".to_string(),
            column: "captions".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Consumer name within the group; defaults to the host name
    pub consumer: Option<String>,
    /// Concurrent jobs in this process, one consumer each
    pub pool_size: usize,
    /// Blocking claim duration
    pub block_ms: u64,
    /// Take over entries pending longer than this (off when unset)
    pub reclaim_idle_ms: Option<u64>,
    /// Delete artifacts after a successful job
    pub cleanup: bool,
    pub retry: RetryPolicy,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            consumer: None,
            pool_size: 1,
            block_ms: 5000,
            reclaim_idle_ms: None,
            cleanup: true,
            retry: RetryPolicy::default(),
        }
    }
}

/// Resolved configuration with absolute paths and environment applied
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub redis: RedisSettings,
    pub layout: ArtifactLayout,
    pub fetch: FetchSettings,
    pub transcribe: TranscribeSettings,
    pub storage: StorageSettings,
    pub database: DatabaseSettings,
    pub worker: WorkerSettings,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

impl ResolvedConfig {
    /// Consumer name for this process
    pub fn consumer_name(&self) -> String {
        self.worker
            .consumer
            .clone()
            .or_else(|| std::env::var("HOSTNAME").ok().filter(|h| !h.is_empty()))
            .unwrap_or_else(|| {
                let id = uuid::Uuid::new_v4().simple().to_string();
                format!("vodscribe-{}", &id[..8])
            })
    }

    /// Human-readable dump with secrets masked
    pub fn describe(&self) -> String {
        let mask = |v: &Option<String>| match v {
            Some(_) => "********".to_string(),
            None => "(unset)".to_string(),
        };
        let redis_target = match &self.redis.url {
            Some(_) => "(url) ********".to_string(),
            None => format!("{}:{}", self.redis.host, self.redis.port),
        };

        let mut out = String::new();
        out.push_str(&format!(
            "config file: {}\n",
            self.config_file
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(none)".to_string())
        ));
        out.push_str(&format!("redis:       {}\n", redis_target));
        out.push_str(&format!("  password:  {}\n", mask(&self.redis.password)));
        out.push_str(&format!(
            "  stream:    {} (group {})\n",
            self.redis.stream, self.redis.group
        ));
        out.push_str(&format!("audio:       {}\n", self.layout.audio_dir.display()));
        out.push_str(&format!("video:       {}\n", self.layout.video_dir.display()));
        out.push_str(&format!("transcripts: {}\n", self.layout.transcript_dir.display()));
        out.push_str(&format!("receipts:    {}\n", self.layout.receipt_dir.display()));
        out.push_str(&format!(
            "whisperx:    model={} device={} threads={} hf_token={}\n",
            self.transcribe.model,
            self.transcribe.device,
            self.transcribe.threads,
            mask(&self.transcribe.hf_token)
        ));
        out.push_str(&format!(
            "storage:     {}/{} token={}\n",
            self.storage.endpoint,
            self.storage.bucket,
            mask(&self.storage.token)
        ));
        out.push_str(&format!("database:    {}\n", self.database.path.display()));
        out.push_str(&format!(
            "worker:      pool={} block={}ms cleanup={}\n",
            self.worker.pool_size, self.worker.block_ms, self.worker.cleanup
        ));
        out
    }

    /// Reject settings the worker cannot run with.
    ///
    /// A blocking claim of 0 ms never times out in Redis.
    pub fn validate(&self) -> Result<()> {
        if self.worker.block_ms == 0 {
            anyhow::bail!("worker.block_ms must be at least 1");
        }
        if self.worker.pool_size == 0 {
            anyhow::bail!("worker.pool_size must be at least 1");
        }
        Ok(())
    }

    /// Apply environment overrides through a lookup function
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.is_empty());

        if let Some(url) = get("REDIS_URL") {
            self.redis.url = Some(url);
        }
        if let Some(host) = get("REDIS_HOST") {
            self.redis.host = host;
        }
        if let Some(port) = get("REDIS_PORT") {
            self.redis.port = port
                .parse()
                .with_context(|| format!("Invalid REDIS_PORT '{}'", port))?;
        }
        if let Some(user) = get("REDIS_USER") {
            self.redis.username = Some(user);
        }
        if let Some(pass) = get("REDIS_PASS") {
            self.redis.password = Some(pass);
        }
        if let Some(token) = get("HF_TOKEN") {
            self.transcribe.hf_token = Some(token);
        }
        if let Some(token) = get("STORAGE_TOKEN") {
            self.storage.token = Some(token);
        }
        Ok(())
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(CONFIG_DIR).join(CONFIG_NAME);
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    let user_config = dirs::config_dir()?.join("vodscribe").join(CONFIG_NAME);
    user_config.exists().then_some(user_config)
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Directory that relative paths in a config file are relative to
fn base_dir_for(config_path: &Path) -> PathBuf {
    let parent = config_path.parent().unwrap_or(Path::new("."));
    if parent.file_name().map(|n| n == CONFIG_DIR).unwrap_or(false) {
        parent.parent().unwrap_or(Path::new(".")).to_path_buf()
    } else {
        parent.to_path_buf()
    }
}

/// Resolve a path that may be relative to a base directory
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

/// Build a resolved configuration from a parsed file
pub fn resolve(file: ConfigFile, base: &Path, config_file: Option<PathBuf>) -> ResolvedConfig {
    let root = file
        .paths
        .root
        .as_deref()
        .map(|r| resolve_path(base, r))
        .unwrap_or_else(|| base.to_path_buf());

    let mut layout = ArtifactLayout::under(&root);
    let sub = |value: &Option<String>| value.as_deref().map(|v| resolve_path(&root, v));
    if let Some(dir) = sub(&file.paths.audio) {
        layout.audio_dir = dir;
    }
    if let Some(dir) = sub(&file.paths.video) {
        layout.video_dir = dir;
    }
    if let Some(dir) = sub(&file.paths.transcripts) {
        layout.transcript_dir = dir;
    }
    if let Some(dir) = sub(&file.paths.receipts) {
        layout.receipt_dir = dir;
    }

    let mut database = file.database;
    database.path = resolve_path(base, &database.path.to_string_lossy());

    ResolvedConfig {
        redis: file.redis,
        layout,
        fetch: file.fetch,
        transcribe: file.transcribe,
        storage: file.storage,
        database,
        worker: file.worker,
        config_file,
    }
}

/// Load configuration from all sources
pub fn load_config(explicit: Option<&Path>) -> Result<ResolvedConfig> {
    let config_file = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => find_config_file(),
    };

    let cwd = std::env::current_dir().context("Failed to determine current directory")?;

    let (file, base) = match &config_file {
        Some(path) => {
            let base = base_dir_for(path);
            let base = if base.is_absolute() { base } else { cwd.join(base) };
            (load_config_file(path)?, base)
        }
        None => (ConfigFile::default(), cwd.clone()),
    };

    let mut config = resolve(file, &base, config_file);

    if let Ok(root) = std::env::var("VODSCRIBE_ROOT") {
        if !root.is_empty() {
            config.layout = ArtifactLayout::under(&resolve_path(&cwd, &root));
        }
    }
    config.apply_env(|name| std::env::var(name).ok())?;
    config.validate()?;

    Ok(config)
}
