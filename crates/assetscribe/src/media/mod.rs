//! Audio normalization and chunking.
//!
//! [`MediaProcessor`] turns a downloaded asset into size-bounded audio
//! [`Chunk`]s inside the job's workspace. Audio goes through the
//! [`Transcoder`] then the [`ChunkSplitter`]; video goes through the
//! [`VideoAudioExtractor`], which feeds the same splitter.

pub mod extractor;
pub mod splitter;
pub mod tool;
pub mod transcoder;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::MediaConfig;
use crate::error::MediaError;
use crate::sanitize::{file_stem, safe_file_name};
use crate::workspace::Workspace;

pub use extractor::VideoAudioExtractor;
pub use splitter::{ChunkSplitter, SplitSettings};
pub use tool::{AudioFormat, Ffmpeg, MediaInfo, MediaTool};
pub use transcoder::Transcoder;

/// One size-bounded slice of normalized audio, ready for transcription.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// 0-based position; defines reassembly order.
    pub index: usize,
    pub path: PathBuf,
    pub byte_size: u64,
    pub duration_seconds: f64,
}

pub struct MediaProcessor {
    transcoder: Transcoder,
    splitter: ChunkSplitter,
    extractor: VideoAudioExtractor,
    max_chunk_bytes: u64,
}

impl MediaProcessor {
    pub fn new(tool: Arc<dyn MediaTool>, config: &MediaConfig) -> Self {
        let format = AudioFormat::from(config);
        let splitter = ChunkSplitter::new(tool.clone(), SplitSettings::from(config));
        Self {
            transcoder: Transcoder::new(tool.clone(), format.clone()),
            extractor: VideoAudioExtractor::new(tool, format, splitter.clone()),
            splitter,
            max_chunk_bytes: config.max_chunk_size_bytes,
        }
    }

    pub fn max_chunk_bytes(&self) -> u64 {
        self.max_chunk_bytes
    }

    /// Normalizes an audio file already in the workspace and splits it.
    pub async fn audio_chunks(
        &self,
        input: &Path,
        original_file_name: &str,
        workspace: &Workspace,
    ) -> Result<Vec<Chunk>, MediaError> {
        let normalized = self.normalize(input, workspace).await?;
        self.split(&normalized, original_file_name, workspace).await
    }

    pub async fn normalize(&self, input: &Path, workspace: &Workspace) -> Result<PathBuf, MediaError> {
        Ok(self.transcoder.normalize_to_audio(input, workspace).await?)
    }

    /// Splits normalized audio into chunks named after `original_file_name`.
    pub async fn split(
        &self,
        audio: &Path,
        original_file_name: &str,
        workspace: &Workspace,
    ) -> Result<Vec<Chunk>, MediaError> {
        let base_name = file_stem(&safe_file_name(original_file_name, "asset"));
        self.splitter
            .split(audio, self.max_chunk_bytes, &base_name, workspace.path())
            .await
    }

    /// Extracts the audio track from in-memory video bytes and splits it.
    pub async fn video_chunks(
        &self,
        video: &[u8],
        original_file_name: &str,
        workspace: &Workspace,
    ) -> Result<Vec<Chunk>, MediaError> {
        self.extractor
            .extract_and_split(video, self.max_chunk_bytes, original_file_name, workspace)
            .await
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::SimulatedTool;
    use super::*;
    use crate::workspace::WorkspaceManager;
    use tempfile::TempDir;

    const MIB: u64 = 1024 * 1024;

    #[tokio::test]
    async fn test_audio_chunks_normalizes_then_splits() {
        let temp = TempDir::new().unwrap();
        let ws = WorkspaceManager::new(temp.path()).acquire("job-a").await.unwrap();

        // 24 kB/s for 1500 s is about 34 MiB once normalized.
        let tool = Arc::new(SimulatedTool::new(24_000.0));
        let input = ws.path().join("lecture.wav");
        tool.create_source(&input, 1500.0);

        let processor = MediaProcessor::new(tool.clone(), &MediaConfig::default());
        let chunks = processor
            .audio_chunks(&input, "lecture.wav", &ws)
            .await
            .unwrap();

        assert_eq!(chunks.len(), 2);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
            assert!(chunk.byte_size <= 25 * MIB);
            assert_eq!(
                chunk.path.file_name().unwrap().to_str().unwrap(),
                format!("lecture_audio_{}.mp3", i)
            );
        }
        let total: f64 = chunks.iter().map(|c| c.duration_seconds).sum();
        assert!((total - 1500.0).abs() < 0.01);
        assert_eq!(tool.transcodes.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_video_chunks_uses_extractor() {
        let temp = TempDir::new().unwrap();
        let ws = WorkspaceManager::new(temp.path()).acquire("job-v").await.unwrap();

        let mut tool = SimulatedTool::new(16_000.0);
        tool.video_duration_seconds = 90.0;
        let tool = Arc::new(tool);

        let processor = MediaProcessor::new(tool.clone(), &MediaConfig::default());
        let chunks = processor
            .video_chunks(b"fake video bytes", "clip.mp4", &ws)
            .await
            .unwrap();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert!((chunks[0].duration_seconds - 90.0).abs() < 0.01);
        assert_eq!(tool.extractions.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
