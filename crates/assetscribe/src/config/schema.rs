use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::secrets::{resolve_secret_optional, SecretError};
use secrecy::SecretString;

pub const DEFAULT_MAX_CHUNK_SIZE_BYTES: u64 = 25 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub version: String,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub transcription: TranscriptionConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            store: StoreConfig::default(),
            transcription: TranscriptionConfig::default(),
            media: MediaConfig::default(),
            worker: WorkerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Reference to a secret: a direct value, a file holding it, or an env var.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_var: Option<String>,
}

impl SecretRef {
    pub fn from_env_var(name: &str) -> Self {
        Self {
            env_var: Some(name.to_string()),
            ..Self::default()
        }
    }

    pub fn resolve(&self) -> Result<Option<SecretString>, SecretError> {
        resolve_secret_optional(
            self.value.as_deref(),
            self.file.as_deref(),
            self.env_var.as_deref(),
        )
    }
}

/// Where jobs and assets live.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum StoreConfig {
    /// REST API of the web application that owns assets and jobs.
    Http {
        #[serde(default = "default_api_base_url")]
        base_url: String,
        #[serde(default = "default_server_api_key")]
        api_key: SecretRef,
        #[serde(default = "default_store_timeout")]
        request_timeout_seconds: u64,
    },
    /// Local SQLite database.
    Sqlite { path: String },
}

fn default_api_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_server_api_key() -> SecretRef {
    SecretRef::from_env_var("SERVER_API_KEY")
}

fn default_store_timeout() -> u64 {
    30
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Http {
            base_url: default_api_base_url(),
            api_key: default_server_api_key(),
            request_timeout_seconds: default_store_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptionConfig {
    #[serde(default = "default_transcription_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_openai_api_key")]
    pub api_key: SecretRef,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default = "default_transcription_timeout")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_transcription_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "whisper-1".to_string()
}

fn default_openai_api_key() -> SecretRef {
    SecretRef::from_env_var("OPENAI_API_KEY")
}

fn default_transcription_timeout() -> u64 {
    300
}

fn default_max_concurrent_requests() -> usize {
    4
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    1_000
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            base_url: default_transcription_base_url(),
            model: default_model(),
            api_key: default_openai_api_key(),
            language: None,
            request_timeout_seconds: default_transcription_timeout(),
            max_concurrent_requests: default_max_concurrent_requests(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl TranscriptionConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaConfig {
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg_path: String,
    #[serde(default = "default_ffprobe")]
    pub ffprobe_path: String,
    #[serde(default = "default_max_chunk_size_bytes")]
    pub max_chunk_size_bytes: u64,
    #[serde(default = "default_safety_margin")]
    pub safety_margin: f64,
    #[serde(default = "default_max_recuts")]
    pub max_recuts: u32,
    #[serde(default = "default_audio_extension")]
    pub audio_extension: String,
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,
}

fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}

fn default_ffprobe() -> String {
    "ffprobe".to_string()
}

fn default_max_chunk_size_bytes() -> u64 {
    DEFAULT_MAX_CHUNK_SIZE_BYTES
}

fn default_safety_margin() -> f64 {
    0.9
}

fn default_max_recuts() -> u32 {
    5
}

fn default_audio_extension() -> String {
    "mp3".to_string()
}

fn default_audio_codec() -> String {
    "libmp3lame".to_string()
}

fn default_audio_bitrate() -> String {
    "192k".to_string()
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg(),
            ffprobe_path: default_ffprobe(),
            max_chunk_size_bytes: default_max_chunk_size_bytes(),
            safety_margin: default_safety_margin(),
            max_recuts: default_max_recuts(),
            audio_extension: default_audio_extension(),
            audio_codec: default_audio_codec(),
            audio_bitrate: default_audio_bitrate(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerConfig {
    #[serde(default = "default_temp_dir")]
    pub temp_dir: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    #[serde(default = "default_max_job_attempts")]
    pub max_job_attempts: u32,
    #[serde(default = "default_heartbeat_interval_seconds")]
    pub heartbeat_interval_seconds: u64,
}

fn default_temp_dir() -> String {
    std::env::temp_dir()
        .join("assetscribe")
        .to_string_lossy()
        .into_owned()
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_max_concurrent_jobs() -> usize {
    2
}

fn default_max_job_attempts() -> u32 {
    3
}

fn default_heartbeat_interval_seconds() -> u64 {
    10
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            temp_dir: default_temp_dir(),
            poll_interval_ms: default_poll_interval_ms(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            max_job_attempts: default_max_job_attempts(),
            heartbeat_interval_seconds: default_heartbeat_interval_seconds(),
        }
    }
}

impl WorkerConfig {
    pub fn temp_root(&self) -> PathBuf {
        PathBuf::from(self.temp_dir.trim_end_matches('/'))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
    /// `RUST_LOG`-style directive; `RUST_LOG` itself wins when set.
    #[serde(default)]
    pub filter: Option<String>,
}
