//! Isolated controller environment backed by an in-memory SQLite store.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use assetscribe::config::Config;
use assetscribe::pipeline::{Pipeline, PipelineConfig};
use assetscribe::store::{JobStore, SqliteStore, UrlObjectStorage};
use assetscribe::worker::{ControllerSettings, JobController};
use assetscribe::{Asset, ProcessingJob, WorkspaceManager};

use super::fakes::{ByteRateTool, ScriptedTranscriber};

/// Chunk ceiling used by the harness: four simulated seconds.
pub const MAX_CHUNK_BYTES: u64 = 4000;

pub struct TestHarness {
    temp_dir: TempDir,
    pub store: SqliteStore,
    pub transcriber: Arc<ScriptedTranscriber>,
    pub config: Config,
    /// Root under which job workspaces are created.
    pub work_root: PathBuf,
    /// Where asset files are uploaded to.
    pub media_dir: PathBuf,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_transcriber(ScriptedTranscriber::new())
    }

    pub fn with_transcriber(transcriber: ScriptedTranscriber) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let work_root = temp_dir.path().join("work");
        let media_dir = temp_dir.path().join("media");
        std::fs::create_dir_all(&media_dir).expect("Failed to create media dir");

        let mut config = Config::default();
        config.media.max_chunk_size_bytes = MAX_CHUNK_BYTES;
        config.transcription.initial_backoff_ms = 5;
        config.transcription.max_backoff_ms = 20;
        config.worker.temp_dir = work_root.display().to_string();

        Self {
            temp_dir,
            store: SqliteStore::open_in_memory().expect("Failed to open store"),
            transcriber: Arc::new(transcriber),
            config,
            work_root,
            media_dir,
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn settings(&self) -> ControllerSettings {
        ControllerSettings {
            poll_interval: Duration::from_millis(20),
            max_concurrent_jobs: 2,
            max_job_attempts: 3,
            heartbeat_interval: Duration::from_millis(30),
        }
    }

    pub fn controller(&self) -> JobController {
        self.controller_with(self.settings())
    }

    pub fn controller_with(&self, settings: ControllerSettings) -> JobController {
        self.build_controller(Arc::new(self.store.clone()), settings)
    }

    /// Controller whose job lifecycle goes through `jobs`; assets still
    /// come from the harness store.
    pub fn controller_with_jobs(&self, jobs: Arc<dyn JobStore>) -> JobController {
        self.build_controller(jobs, self.settings())
    }

    fn build_controller(
        &self,
        jobs: Arc<dyn JobStore>,
        settings: ControllerSettings,
    ) -> JobController {
        let pipeline = Pipeline::new(
            &PipelineConfig::from_config(&self.config),
            Arc::new(self.store.clone()),
            Arc::new(
                UrlObjectStorage::new(Duration::from_secs(5)).expect("Failed to build storage"),
            ),
            Arc::new(ByteRateTool),
            self.transcriber.clone(),
        );
        JobController::new(
            jobs,
            Arc::new(pipeline),
            WorkspaceManager::new(&self.work_root),
            settings,
        )
    }

    /// Uploads `contents` as `file_name` and queues a job for it.
    pub fn add_asset(&self, file_name: &str, file_type: &str, contents: &[u8]) -> ProcessingJob {
        let path = self.media_dir.join(file_name);
        std::fs::write(&path, contents).expect("Failed to write asset file");

        let asset = Asset {
            id: format!("asset-{}", file_name),
            project_id: Some("project-1".to_string()),
            file_name: file_name.to_string(),
            file_type: file_type.to_string(),
            file_url: format!("file://{}", path.display()),
            mime_type: None,
            size: Some(contents.len() as u64),
            content: None,
        };
        self.store.insert_asset(&asset).expect("Failed to insert asset");
        self.store.enqueue(&asset.id).expect("Failed to enqueue job")
    }

    pub fn job(&self, id: &str) -> ProcessingJob {
        self.store
            .find_job(id)
            .expect("Failed to read job")
            .expect("Job not found")
    }

    pub fn asset_of(&self, job: &ProcessingJob) -> Asset {
        self.store
            .find_asset(&job.asset_id)
            .expect("Failed to read asset")
            .expect("Asset not found")
    }

    pub fn workspace_path(&self, job_id: &str) -> PathBuf {
        self.work_root.join(job_id)
    }
}

/// `seconds` of simulated audio.
pub fn audio_bytes(seconds: usize) -> Vec<u8> {
    vec![b'A'; seconds * super::fakes::BYTES_PER_SECOND as usize]
}
