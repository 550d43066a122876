use std::sync::Arc;

use log::{info, warn};

use crate::error::{MediaError, TranscodeError};
use crate::media::splitter::ChunkSplitter;
use crate::media::tool::{file_size, AudioFormat, MediaTool};
use crate::media::Chunk;
use crate::sanitize::{file_stem, safe_file_name};
use crate::workspace::Workspace;

/// Pulls the audio track out of a video asset and chunks it.
pub struct VideoAudioExtractor {
    tool: Arc<dyn MediaTool>,
    format: AudioFormat,
    splitter: ChunkSplitter,
}

impl VideoAudioExtractor {
    pub fn new(tool: Arc<dyn MediaTool>, format: AudioFormat, splitter: ChunkSplitter) -> Self {
        Self {
            tool,
            format,
            splitter,
        }
    }

    /// Pipes `video` through the transcoder's stdin into an audio-only file,
    /// then splits that file.
    ///
    /// Containers that need seeking (MP4 with a trailing index) cannot be
    /// decoded from a pipe; when piping fails the bytes are written to the
    /// workspace and transcoded from disk instead.
    pub async fn extract_and_split(
        &self,
        video: &[u8],
        max_bytes: u64,
        original_file_name: &str,
        workspace: &Workspace,
    ) -> Result<Vec<Chunk>, MediaError> {
        let safe_name = safe_file_name(original_file_name, "video");
        let base_name = file_stem(&safe_name);
        let audio_path = workspace
            .path()
            .join(format!("{}_extracted.{}", base_name, self.format.extension));

        info!(
            "Extracting audio from {} ({} bytes)",
            safe_name,
            video.len()
        );

        match self.tool.extract_audio(video, &audio_path, &self.format).await {
            Ok(()) => {}
            Err(e @ TranscodeError::Spawn { .. }) => return Err(e.into()),
            Err(e) => {
                warn!("Piped extraction failed, retrying from disk: {}", e);
                let video_path = workspace.write_file(&safe_name, video).await?;
                self.tool
                    .transcode_audio(&video_path, &audio_path, &self.format)
                    .await?;
            }
        }

        match file_size(&audio_path).await {
            Ok(size) if size > 0 => {}
            _ => return Err(TranscodeError::NoAudioTrack(safe_name).into()),
        }

        self.splitter
            .split(&audio_path, max_bytes, &base_name, workspace.path())
            .await
    }
}
