use std::sync::Arc;

use tracing::{debug, info, info_span, Instrument};

use crate::media::{Chunk, MediaProcessor, MediaTool};
use crate::sanitize;
use crate::store::{AssetStore, ObjectStorage};
use crate::transcription::{TranscriptionOrchestrator, TranscriptionService};
use crate::worker::{Asset, MediaKind};
use crate::workspace::Workspace;

use super::config::PipelineConfig;
use super::context::PipelineContext;
use super::error::PipelineError;
use super::progress::{JobPhase, ProgressEvent, ProgressReporter};

/// What a successful run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// Transcript persisted to the asset.
    Transcribed { chunks: usize, characters: usize },
    /// Nothing to transcribe for this kind of asset.
    Skipped { kind: MediaKind },
}

pub struct Pipeline {
    assets: Arc<dyn AssetStore>,
    objects: Arc<dyn ObjectStorage>,
    media: MediaProcessor,
    orchestrator: TranscriptionOrchestrator,
}

impl Pipeline {
    pub fn new(
        config: &PipelineConfig,
        assets: Arc<dyn AssetStore>,
        objects: Arc<dyn ObjectStorage>,
        media_tool: Arc<dyn MediaTool>,
        transcriber: Arc<dyn TranscriptionService>,
    ) -> Self {
        Self {
            assets,
            objects,
            media: MediaProcessor::new(media_tool, &config.media),
            orchestrator: TranscriptionOrchestrator::new(
                transcriber,
                config.max_concurrent_requests,
                config.retry,
            ),
        }
    }

    /// Runs every step for one claimed job inside `workspace`.
    ///
    /// The asset's content is written only when every step before it
    /// succeeded. Job status is left to the caller.
    pub async fn run(
        &self,
        ctx: &mut PipelineContext,
        workspace: &Workspace,
        progress: &dyn ProgressReporter,
    ) -> Result<PipelineOutcome, PipelineError> {
        let span = info_span!("pipeline",
            job_id = %ctx.job.id,
            asset_id = %ctx.job.asset_id,
            attempt = ctx.job.attempts,
        );

        let result = self.run_steps(ctx, workspace, progress).instrument(span).await;

        match &result {
            Ok(PipelineOutcome::Transcribed { chunks, characters }) => {
                progress.report(ProgressEvent::Completed {
                    chunks: *chunks,
                    characters: *characters,
                });
            }
            Ok(PipelineOutcome::Skipped { kind }) => {
                progress.report(ProgressEvent::Skipped {
                    reason: format!("{} assets are not transcribed", kind),
                });
            }
            Err(e) => {
                progress.report(ProgressEvent::Failed {
                    error: e.to_string(),
                });
            }
        }

        result
    }

    async fn run_steps(
        &self,
        ctx: &mut PipelineContext,
        workspace: &Workspace,
        progress: &dyn ProgressReporter,
    ) -> Result<PipelineOutcome, PipelineError> {
        // Step 1: Resolve asset and classify
        let asset = self
            .step_resolve_asset(ctx)
            .instrument(info_span!("resolve_asset"))
            .await?;

        let kind = MediaKind::classify(&asset);
        ctx.media_kind = Some(kind);
        if kind == MediaKind::Unsupported {
            info!(
                file_type = %asset.file_type,
                file = %sanitize::safe_file_name(&asset.file_name, "asset"),
                "Asset is not audio or video, skipping transcription"
            );
            return Ok(PipelineOutcome::Skipped { kind });
        }

        // Step 2: Download
        progress.report(ProgressEvent::Phase {
            phase: JobPhase::Downloading,
            message: "Downloading asset file...".to_string(),
        });
        let bytes = self
            .step_download(&asset)
            .instrument(info_span!("download"))
            .await?;

        // Step 3: Normalize and split
        let chunks = self
            .step_chunks(ctx, &asset, kind, bytes, workspace, progress)
            .instrument(info_span!("chunk", kind = %kind))
            .await?;
        progress.report(ProgressEvent::Chunked {
            chunks: chunks.len(),
        });
        ctx.chunks = chunks;

        // Step 4: Transcribe
        progress.report(ProgressEvent::Phase {
            phase: JobPhase::Transcribing,
            message: format!("Transcribing {} chunks...", ctx.chunks.len()),
        });
        let transcript = self
            .orchestrator
            .transcribe_all(&ctx.chunks)
            .instrument(info_span!("transcribe"))
            .await?;
        ctx.transcript = Some(transcript.clone());

        // Step 5: Persist
        progress.report(ProgressEvent::Phase {
            phase: JobPhase::Persisting,
            message: "Saving transcript...".to_string(),
        });
        self.assets
            .set_content(&asset.id, &transcript)
            .instrument(info_span!("persist"))
            .await
            .map_err(PipelineError::Persist)?;

        info!(
            chunks = ctx.chunks.len(),
            characters = transcript.len(),
            "Transcript saved"
        );

        Ok(PipelineOutcome::Transcribed {
            chunks: ctx.chunks.len(),
            characters: transcript.len(),
        })
    }

    async fn step_resolve_asset(&self, ctx: &mut PipelineContext) -> Result<Asset, PipelineError> {
        let asset = self
            .assets
            .get_asset(&ctx.job.asset_id)
            .await
            .map_err(PipelineError::Asset)?;
        debug!(
            file_type = %asset.file_type,
            size = asset.size,
            "Resolved asset"
        );
        ctx.asset = Some(asset.clone());
        Ok(asset)
    }

    async fn step_download(&self, asset: &Asset) -> Result<Vec<u8>, PipelineError> {
        let bytes = self
            .objects
            .fetch(&asset.file_url)
            .await
            .map_err(PipelineError::Download)?;
        debug!(
            bytes = bytes.len(),
            url = %sanitize::redact_url(&asset.file_url),
            "Downloaded asset"
        );
        Ok(bytes)
    }

    async fn step_chunks(
        &self,
        ctx: &mut PipelineContext,
        asset: &Asset,
        kind: MediaKind,
        bytes: Vec<u8>,
        workspace: &Workspace,
        progress: &dyn ProgressReporter,
    ) -> Result<Vec<Chunk>, PipelineError> {
        match kind {
            MediaKind::Audio => {
                let source = workspace.write_file(&asset.file_name, &bytes).await?;
                drop(bytes);
                ctx.source_path = Some(source.clone());

                progress.report(ProgressEvent::Phase {
                    phase: JobPhase::Transcoding,
                    message: "Normalizing audio...".to_string(),
                });
                let normalized = self.media.normalize(&source, workspace).await?;

                progress.report(ProgressEvent::Phase {
                    phase: JobPhase::Splitting,
                    message: "Splitting audio into chunks...".to_string(),
                });
                Ok(self
                    .media
                    .split(&normalized, &asset.file_name, workspace)
                    .await?)
            }
            MediaKind::Video => {
                progress.report(ProgressEvent::Phase {
                    phase: JobPhase::Transcoding,
                    message: "Extracting audio track...".to_string(),
                });
                Ok(self
                    .media
                    .video_chunks(&bytes, &asset.file_name, workspace)
                    .await?)
            }
            MediaKind::Unsupported => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{MediaError, TranscodeError};
    use crate::media::test_support::SimulatedTool;
    use crate::pipeline::progress::NoopProgress;
    use crate::store::{SqliteStore, StoreError};
    use crate::transcription::TranscriptionError;
    use crate::worker::ProcessingJob;
    use crate::workspace::WorkspaceManager;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct MemoryObjects(HashMap<String, Vec<u8>>);

    #[async_trait]
    impl ObjectStorage for MemoryObjects {
        async fn fetch(&self, url: &str) -> Result<Vec<u8>, StoreError> {
            self.0
                .get(url)
                .cloned()
                .ok_or_else(|| StoreError::UnsupportedUrl(url.to_string()))
        }
    }

    struct NamingService;

    #[async_trait]
    impl TranscriptionService for NamingService {
        async fn transcribe(
            &self,
            _audio: &[u8],
            file_name: &str,
        ) -> Result<String, TranscriptionError> {
            Ok(format!("[{}]", file_name))
        }
    }

    struct RecordingProgress(Mutex<Vec<JobPhase>>);

    impl ProgressReporter for RecordingProgress {
        fn report(&self, event: ProgressEvent) {
            let phase = match event {
                ProgressEvent::Phase { phase, .. } => phase,
                ProgressEvent::Chunked { .. } => JobPhase::Splitting,
                ProgressEvent::Completed { .. } => JobPhase::Completed,
                ProgressEvent::Skipped { .. } => JobPhase::Skipped,
                ProgressEvent::Failed { .. } => JobPhase::Failed,
            };
            self.0.lock().unwrap().push(phase);
        }
    }

    struct Harness {
        _temp: TempDir,
        manager: WorkspaceManager,
        store: SqliteStore,
        tool: Arc<SimulatedTool>,
    }

    impl Harness {
        fn new(tool: SimulatedTool) -> Self {
            let temp = TempDir::new().unwrap();
            let manager = WorkspaceManager::new(temp.path().join("work"));
            Self {
                _temp: temp,
                manager,
                store: SqliteStore::open_in_memory().unwrap(),
                tool: Arc::new(tool),
            }
        }

        fn add_asset(&self, file_name: &str, file_type: &str) -> ProcessingJob {
            let asset = Asset {
                id: format!("asset-{}", file_name),
                project_id: None,
                file_name: file_name.to_string(),
                file_type: file_type.to_string(),
                file_url: format!("mem://{}", file_name),
                mime_type: None,
                size: None,
                content: None,
            };
            self.store.insert_asset(&asset).unwrap();
            self.store.enqueue(&asset.id).unwrap()
        }

        fn pipeline(&self, objects: HashMap<String, Vec<u8>>) -> Pipeline {
            Pipeline::new(
                &PipelineConfig::default(),
                Arc::new(self.store.clone()),
                Arc::new(MemoryObjects(objects)),
                self.tool.clone(),
                Arc::new(NamingService),
            )
        }
    }

    fn objects(entries: &[(&str, &[u8])]) -> HashMap<String, Vec<u8>> {
        entries
            .iter()
            .map(|(name, bytes)| (format!("mem://{}", name), bytes.to_vec()))
            .collect()
    }

    #[tokio::test]
    async fn test_audio_asset_is_transcribed_and_saved() {
        let h = Harness::new(SimulatedTool::new(24_000.0));
        let job = h.add_asset("talk.wav", "audio");
        let pipeline = h.pipeline(objects(&[("talk.wav", b"RIFF....WAVE")]));
        let ws = h.manager.acquire(&job.id).await.unwrap();
        let progress = RecordingProgress(Mutex::new(Vec::new()));

        let mut ctx = PipelineContext::new(job);
        let outcome = pipeline.run(&mut ctx, &ws, &progress).await.unwrap();

        assert_eq!(
            outcome,
            PipelineOutcome::Transcribed {
                chunks: 1,
                characters: "[talk_audio_0.mp3]".len()
            }
        );
        assert_eq!(ctx.media_kind, Some(MediaKind::Audio));
        assert_eq!(ctx.transcript.as_deref(), Some("[talk_audio_0.mp3]"));
        let saved = h.store.find_asset("asset-talk.wav").unwrap().unwrap();
        assert_eq!(saved.content.as_deref(), Some("[talk_audio_0.mp3]"));

        let phases = progress.0.lock().unwrap().clone();
        assert_eq!(phases.first(), Some(&JobPhase::Downloading));
        assert!(phases.contains(&JobPhase::Transcoding));
        assert!(phases.contains(&JobPhase::Transcribing));
        assert_eq!(phases.last(), Some(&JobPhase::Completed));

        ws.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_video_asset_goes_through_extractor() {
        let h = Harness::new(SimulatedTool::new(24_000.0));
        let job = h.add_asset("clip.mp4", "video");
        let pipeline = h.pipeline(objects(&[("clip.mp4", b"ftypisom")]));
        let ws = h.manager.acquire(&job.id).await.unwrap();

        let mut ctx = PipelineContext::new(job);
        let outcome = pipeline.run(&mut ctx, &ws, &NoopProgress).await.unwrap();

        assert!(matches!(outcome, PipelineOutcome::Transcribed { chunks: 1, .. }));
        assert_eq!(h.tool.extractions.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(ctx.source_path.is_none());
        let saved = h.store.find_asset("asset-clip.mp4").unwrap().unwrap();
        assert_eq!(saved.content.as_deref(), Some("[clip_audio_0.mp3]"));
    }

    #[tokio::test]
    async fn test_unsupported_asset_is_skipped_without_download() {
        let h = Harness::new(SimulatedTool::new(24_000.0));
        let job = h.add_asset("notes.md", "markdown");
        let pipeline = h.pipeline(HashMap::new());
        let ws = h.manager.acquire(&job.id).await.unwrap();

        let mut ctx = PipelineContext::new(job);
        let outcome = pipeline.run(&mut ctx, &ws, &NoopProgress).await.unwrap();

        assert_eq!(
            outcome,
            PipelineOutcome::Skipped {
                kind: MediaKind::Unsupported
            }
        );
        let saved = h.store.find_asset("asset-notes.md").unwrap().unwrap();
        assert!(saved.content.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_audio_fails_without_content() {
        let mut tool = SimulatedTool::new(24_000.0);
        tool.fail_transcode = true;
        let h = Harness::new(tool);
        let job = h.add_asset("broken.wav", "audio");
        let pipeline = h.pipeline(objects(&[("broken.wav", b"garbage")]));
        let ws = h.manager.acquire(&job.id).await.unwrap();

        let mut ctx = PipelineContext::new(job);
        let err = pipeline.run(&mut ctx, &ws, &NoopProgress).await.unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Media(MediaError::Transcode(TranscodeError::ToolFailed { .. }))
        ));
        assert!(err.to_string().contains("Invalid data found"));
        let saved = h.store.find_asset("asset-broken.wav").unwrap().unwrap();
        assert!(saved.content.is_none());
    }

    #[tokio::test]
    async fn test_missing_asset_and_missing_file() {
        let h = Harness::new(SimulatedTool::new(24_000.0));
        let job = h.add_asset("talk.wav", "audio");
        let pipeline = h.pipeline(HashMap::new());
        let ws = h.manager.acquire(&job.id).await.unwrap();

        let mut ctx = PipelineContext::new(job.clone());
        let err = pipeline.run(&mut ctx, &ws, &NoopProgress).await.unwrap_err();
        assert!(matches!(err, PipelineError::Download(_)));

        let mut orphan = job;
        orphan.asset_id = "gone".to_string();
        let mut ctx = PipelineContext::new(orphan);
        let err = pipeline.run(&mut ctx, &ws, &NoopProgress).await.unwrap_err();
        assert!(matches!(err, PipelineError::Asset(StoreError::NotFound { .. })));
    }
}
