//! Speech-to-text for audio chunks.

pub mod orchestrator;
pub mod whisper;

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

pub use orchestrator::{RetryPolicy, TranscriptionOrchestrator};
pub use whisper::WhisperClient;

#[derive(Error, Debug)]
pub enum TranscriptionError {
    /// Worth retrying: timeouts, connection failures, 408/429/5xx.
    #[error("Transient transcription failure: {0}")]
    Transient(String),

    #[error("Transcription rejected: {0}")]
    Permanent(String),

    #[error("Failed to read chunk {index} at '{path}': {source}")]
    ReadChunk {
        index: usize,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Chunk {index} failed after {attempts} attempts: {message}")]
    Exhausted {
        index: usize,
        attempts: u32,
        message: String,
    },

    #[error("Chunk {index} failed: {message}")]
    Failed { index: usize, message: String },
}

impl TranscriptionError {
    pub fn is_transient(&self) -> bool {
        matches!(self, TranscriptionError::Transient(_))
    }

    /// The chunk a job-level failure refers to.
    pub fn chunk_index(&self) -> Option<usize> {
        match self {
            TranscriptionError::ReadChunk { index, .. }
            | TranscriptionError::Exhausted { index, .. }
            | TranscriptionError::Failed { index, .. } => Some(*index),
            TranscriptionError::Transient(_) | TranscriptionError::Permanent(_) => None,
        }
    }
}

/// A remote speech-to-text service.
#[async_trait]
pub trait TranscriptionService: Send + Sync {
    /// Transcribes one audio file. `file_name` carries the extension the
    /// service uses to detect the encoding.
    async fn transcribe(&self, audio: &[u8], file_name: &str)
        -> Result<String, TranscriptionError>;
}
