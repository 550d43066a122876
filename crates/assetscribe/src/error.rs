use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AssetscribeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Secret error: {0}")]
    Secret(#[from] crate::secrets::SecretError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Invalid value '{value}' for environment variable {name}: {reason}")]
    InvalidEnv {
        name: String,
        value: String,
        reason: String,
    },
}

#[derive(Error, Debug)]
pub enum WorkspaceError {
    #[error("Invalid job id for workspace: '{0}'")]
    InvalidJobId(String),

    #[error("Failed to create workspace directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write workspace file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove workspace directory '{path}': {source}")]
    RemoveDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failures of the external transcoding tool. These are deterministic for a
/// given input and are never retried.
#[derive(Error, Debug)]
pub enum TranscodeError {
    #[error("Failed to launch {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} exited with {status}: {stderr}")]
    ToolFailed {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("Failed to probe '{path}': {reason}")]
    Probe { path: PathBuf, reason: String },

    #[error("Transcoder produced no output at '{0}'")]
    EmptyOutput(PathBuf),

    #[error("No audio track could be extracted from '{0}'")]
    NoAudioTrack(String),

    #[error("IO error for '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum MediaError {
    #[error(transparent)]
    Transcode(#[from] TranscodeError),

    #[error("Chunk {index} is {size_bytes} bytes, above the {max_bytes} byte limit")]
    ChunkSizeViolation {
        index: usize,
        size_bytes: u64,
        max_bytes: u64,
    },

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to build async runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),

    #[error("Unsupported operation for the configured store: {0}")]
    UnsupportedStore(String),

    #[error("Failed to install signal handler: {0}")]
    Signal(String),
}

pub type Result<T> = std::result::Result<T, AssetscribeError>;
