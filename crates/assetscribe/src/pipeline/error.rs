use thiserror::Error;

use crate::error::{MediaError, WorkspaceError};
use crate::store::StoreError;
use crate::transcription::TranscriptionError;

/// Why a job failed. The `Display` text is stored as the job's error message.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Asset lookup failed: {0}")]
    Asset(#[source] StoreError),

    #[error("Asset download failed: {0}")]
    Download(#[source] StoreError),

    #[error("Media processing failed: {0}")]
    Media(#[from] MediaError),

    #[error("Workspace error: {0}")]
    Workspace(#[from] WorkspaceError),

    #[error("Transcription failed: {0}")]
    Transcription(#[from] TranscriptionError),

    #[error("Failed to save transcript: {0}")]
    Persist(#[source] StoreError),
}
