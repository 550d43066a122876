pub mod config;
pub mod error;
pub mod logging;
pub mod media;
pub mod pipeline;
pub mod sanitize;
pub mod secrets;
pub mod store;
pub mod transcription;
pub mod worker;
pub mod workspace;

pub use config::{load_config, Config};
pub use error::{
    AssetscribeError, ConfigError, MediaError, Result, TranscodeError, WorkerError,
    WorkspaceError,
};
pub use media::{Chunk, MediaProcessor};
pub use pipeline::{Pipeline, PipelineConfig, PipelineContext, PipelineError};
pub use secrets::{resolve_secret, resolve_secret_optional, SecretError};
pub use store::{AssetStore, JobStore, ObjectStorage, StoreError};
pub use transcription::{TranscriptionError, TranscriptionOrchestrator, TranscriptionService};
pub use worker::{Asset, JobController, JobOutcome, JobRunner, JobStatus, MediaKind, ProcessingJob};
pub use workspace::{Workspace, WorkspaceManager};
