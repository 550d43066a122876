//! Wires stores, tools and clients from a [`Config`].

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};

use crate::config::{Config, StoreConfig};
use crate::error::{AssetscribeError, Result, WorkerError};
use crate::media::{Ffmpeg, MediaTool};
use crate::pipeline::{Pipeline, PipelineConfig};
use crate::sanitize::redact_url;
use crate::secrets::SecretError;
use crate::store::{ApiClient, AssetStore, JobStore, ObjectStorage, SqliteStore, UrlObjectStorage};
use crate::transcription::{TranscriptionService, WhisperClient};
use crate::workspace::WorkspaceManager;

use super::controller::{ControllerSettings, JobController};

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(600);

/// Everything a controller talks to.
pub struct Components {
    pub jobs: Arc<dyn JobStore>,
    pub assets: Arc<dyn AssetStore>,
    pub objects: Arc<dyn ObjectStorage>,
    pub media_tool: Arc<dyn MediaTool>,
    pub transcriber: Arc<dyn TranscriptionService>,
}

impl Components {
    pub fn from_config(config: &Config) -> Result<Self> {
        let (jobs, assets): (Arc<dyn JobStore>, Arc<dyn AssetStore>) = match &config.store {
            StoreConfig::Http {
                base_url,
                api_key,
                request_timeout_seconds,
            } => {
                let api_key = match api_key.resolve() {
                    Ok(key) => key,
                    Err(SecretError::EnvVarNotSet { name }) => {
                        warn!("{} is not set, calling the job API without a token", name);
                        None
                    }
                    Err(e) => return Err(e.into()),
                };
                let client = Arc::new(ApiClient::new(
                    base_url,
                    api_key,
                    Duration::from_secs(*request_timeout_seconds),
                )?);
                info!("Using job API at {}", redact_url(base_url));
                let jobs: Arc<dyn JobStore> = client.clone();
                let assets: Arc<dyn AssetStore> = client;
                (jobs, assets)
            }
            StoreConfig::Sqlite { path } => {
                let store = Arc::new(SqliteStore::open(Path::new(path))?);
                let jobs: Arc<dyn JobStore> = store.clone();
                let assets: Arc<dyn AssetStore> = store;
                (jobs, assets)
            }
        };

        let transcription_key = config
            .transcription
            .api_key
            .resolve()?
            .ok_or(SecretError::NoSourceProvided)?;
        let transcriber = WhisperClient::new(transcription_key, &config.transcription)
            .map_err(|e| WorkerError::HttpClient(e.to_string()))?;
        info!(
            "Transcribing with model {} at {}",
            transcriber.model(),
            redact_url(&config.transcription.base_url)
        );

        Ok(Self {
            jobs,
            assets,
            objects: Arc::new(UrlObjectStorage::new(DOWNLOAD_TIMEOUT)?),
            media_tool: Arc::new(Ffmpeg::from_config(&config.media)),
            transcriber: Arc::new(transcriber),
        })
    }

    pub fn into_controller(self, config: &Config) -> JobController {
        let pipeline = Pipeline::new(
            &PipelineConfig::from_config(config),
            self.assets,
            self.objects,
            self.media_tool,
            self.transcriber,
        );
        JobController::new(
            self.jobs,
            Arc::new(pipeline),
            WorkspaceManager::new(config.worker.temp_root()),
            ControllerSettings::from(&config.worker),
        )
    }
}

pub fn build_controller(config: &Config) -> Result<JobController> {
    Ok(Components::from_config(config)?.into_controller(config))
}

/// Opens the configured SQLite store; other store kinds are managed by
/// their own application.
pub fn open_sqlite_store(config: &Config) -> Result<SqliteStore> {
    match &config.store {
        StoreConfig::Sqlite { path } => Ok(SqliteStore::open(Path::new(path))?),
        StoreConfig::Http { .. } => Err(AssetscribeError::Worker(WorkerError::UnsupportedStore(
            "jobs can only be enqueued into a sqlite store".to_string(),
        ))),
    }
}
