use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info};

use crate::error::TranscodeError;
use crate::media::tool::{file_size, AudioFormat, MediaInfo, MediaTool};
use crate::sanitize::redact_path;
use crate::workspace::Workspace;

/// Converts arbitrary audio/video input into the normalized audio encoding.
pub struct Transcoder {
    tool: Arc<dyn MediaTool>,
    format: AudioFormat,
}

impl Transcoder {
    pub fn new(tool: Arc<dyn MediaTool>, format: AudioFormat) -> Self {
        Self { tool, format }
    }

    pub fn format(&self) -> &AudioFormat {
        &self.format
    }

    pub async fn probe(&self, input: &Path) -> Result<MediaInfo, TranscodeError> {
        self.tool.probe(input).await
    }

    /// Returns a path to `input` in the target encoding.
    ///
    /// Input whose extension and audio codec both match the target is used
    /// as-is; anything else is re-encoded to `<stem>.<ext>` inside the
    /// workspace.
    pub async fn normalize_to_audio(
        &self,
        input: &Path,
        workspace: &Workspace,
    ) -> Result<PathBuf, TranscodeError> {
        if self.is_target_encoding(input).await {
            debug!(
                "{} is already {}; skipping transcode",
                redact_path(input),
                self.format.extension
            );
            return Ok(input.to_path_buf());
        }

        let stem = input
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .unwrap_or("asset");
        let mut output = workspace
            .path()
            .join(format!("{}.{}", stem, self.format.extension));
        // A mislabelled input can sit at the very path we would write to.
        if output == input {
            output = workspace
                .path()
                .join(format!("{}_normalized.{}", stem, self.format.extension));
        }

        info!(
            "Transcoding {} to {} ({} @ {})",
            redact_path(input),
            self.format.extension,
            self.format.codec,
            self.format.bitrate
        );
        self.tool
            .transcode_audio(input, &output, &self.format)
            .await?;

        let size = match file_size(&output).await {
            Ok(size) => size,
            Err(_) => return Err(TranscodeError::EmptyOutput(output)),
        };
        if size == 0 {
            return Err(TranscodeError::EmptyOutput(output));
        }

        debug!("Transcoded {} ({} bytes)", redact_path(&output), size);
        Ok(output)
    }

    async fn is_target_encoding(&self, input: &Path) -> bool {
        let extension_matches = input
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(&self.format.extension));
        if !extension_matches {
            return false;
        }

        match self.tool.probe(input).await {
            Ok(info) => match info.audio_codec.as_deref() {
                Some(codec) if codec == self.format.stream_codec() => true,
                codec => {
                    info!(
                        "{} has extension {} but codec {:?}; re-encoding",
                        redact_path(input),
                        self.format.extension,
                        codec
                    );
                    false
                }
            },
            Err(e) => {
                debug!("Probe of {} failed, re-encoding: {}", redact_path(input), e);
                false
            }
        }
    }
}
