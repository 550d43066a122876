//! Persistence seams for jobs, assets and asset files.
//!
//! Job status and heartbeat only ever change through compare-and-set
//! operations, so several worker processes can share one queue.

pub mod error;
pub mod http;
pub mod object;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::worker::{Asset, JobStatus, ProcessingJob};

pub use error::StoreError;
pub use http::ApiClient;
pub use object::UrlObjectStorage;
pub use sqlite::{Database, SqliteStore};

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Jobs that are not yet terminal.
    async fn list_active(&self) -> Result<Vec<ProcessingJob>, StoreError>;

    /// Moves `job` from pending to processing, incrementing its attempts and
    /// stamping the heartbeat. Fails with [`StoreError::ClaimConflict`] when
    /// the job is no longer pending.
    async fn claim(
        &self,
        job: &ProcessingJob,
        at: DateTime<Utc>,
    ) -> Result<ProcessingJob, StoreError>;

    /// Refreshes the heartbeat of a processing job. Fails with
    /// [`StoreError::Conflict`] once the job has left processing.
    async fn heartbeat(&self, job_id: &str, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Moves a processing job to a terminal status.
    async fn finish(
        &self,
        job_id: &str,
        status: JobStatus,
        error_message: Option<&str>,
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait AssetStore: Send + Sync {
    async fn get_asset(&self, asset_id: &str) -> Result<Asset, StoreError>;

    async fn set_content(&self, asset_id: &str, content: &str) -> Result<(), StoreError>;
}

/// Where asset file bytes live.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, StoreError>;
}
