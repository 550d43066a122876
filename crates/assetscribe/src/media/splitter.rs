use std::path::Path;
use std::sync::Arc;

use log::{debug, info, warn};

use crate::config::MediaConfig;
use crate::error::{MediaError, TranscodeError};
use crate::media::tool::{file_size, MediaTool};
use crate::media::Chunk;
use crate::sanitize::redact_path;

/// Remaining audio shorter than this is treated as the end of the stream.
const END_EPSILON_SECONDS: f64 = 0.01;

/// A cut that comes back empty is tolerated only this close to the end.
const EMPTY_TAIL_TOLERANCE_SECONDS: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitSettings {
    /// Fraction of the byte ceiling to aim for when estimating durations.
    pub safety_margin: f64,
    /// How often one segment may be re-cut after overshooting.
    pub max_recuts: u32,
}

impl Default for SplitSettings {
    fn default() -> Self {
        Self {
            safety_margin: 0.9,
            max_recuts: 5,
        }
    }
}

impl From<&MediaConfig> for SplitSettings {
    fn from(config: &MediaConfig) -> Self {
        Self {
            safety_margin: config.safety_margin,
            max_recuts: config.max_recuts,
        }
    }
}

/// Divides normalized audio into sequential chunks under a byte ceiling.
#[derive(Clone)]
pub struct ChunkSplitter {
    tool: Arc<dyn MediaTool>,
    settings: SplitSettings,
}

impl ChunkSplitter {
    pub fn new(tool: Arc<dyn MediaTool>, settings: SplitSettings) -> Self {
        Self { tool, settings }
    }

    /// Splits `audio` into `<base_name>_audio_<index>.<ext>` files in `out_dir`.
    ///
    /// Every returned chunk is at most `max_bytes`; indices run 0..n with no
    /// gaps and their durations add up to the source duration.
    pub async fn split(
        &self,
        audio: &Path,
        max_bytes: u64,
        base_name: &str,
        out_dir: &Path,
    ) -> Result<Vec<Chunk>, MediaError> {
        let info = self.tool.probe(audio).await?;
        let total_duration = match info.duration_seconds {
            Some(d) if d > 0.0 => d,
            _ => {
                return Err(TranscodeError::Probe {
                    path: audio.to_path_buf(),
                    reason: "audio has no positive duration".to_string(),
                }
                .into())
            }
        };
        if info.size_bytes == 0 {
            return Err(TranscodeError::Probe {
                path: audio.to_path_buf(),
                reason: "audio is empty".to_string(),
            }
            .into());
        }

        let extension = audio
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("mp3")
            .to_ascii_lowercase();
        let chunk_path =
            |index: usize| out_dir.join(format!("{}_audio_{}.{}", base_name, index, extension));

        if info.size_bytes <= max_bytes {
            let path = chunk_path(0);
            tokio::fs::copy(audio, &path)
                .await
                .map_err(|e| TranscodeError::Io {
                    path: path.clone(),
                    source: e,
                })?;
            let chunk = Chunk {
                index: 0,
                path,
                byte_size: info.size_bytes,
                duration_seconds: total_duration,
            };
            log_chunk(&chunk);
            return Ok(vec![chunk]);
        }

        let bytes_per_second = info.size_bytes as f64 / total_duration;
        let estimated = self.settings.safety_margin * max_bytes as f64 / bytes_per_second;
        debug!(
            "Splitting {} ({} bytes, {:.2}s) into ~{:.2}s segments",
            redact_path(audio),
            info.size_bytes,
            total_duration,
            estimated
        );

        let mut chunks = Vec::new();
        let mut start = 0.0_f64;

        while total_duration - start > END_EPSILON_SECONDS {
            let index = chunks.len();
            let path = chunk_path(index);
            let mut segment = estimated.min(total_duration - start);
            let mut recuts = 0;

            let byte_size = loop {
                self.tool.cut(audio, &path, start, segment).await?;
                let size = file_size(&path).await?;
                if size <= max_bytes {
                    break size;
                }

                let violation = MediaError::ChunkSizeViolation {
                    index,
                    size_bytes: size,
                    max_bytes,
                };
                warn!("{}", violation);
                if recuts >= self.settings.max_recuts {
                    return Err(violation);
                }
                recuts += 1;
                segment *= self.settings.safety_margin * max_bytes as f64 / size as f64;
                debug!("Re-cutting chunk {} at {:.2}s (attempt {})", index, segment, recuts);
            };

            if byte_size == 0 {
                let remaining = total_duration - start;
                discard(&path).await;
                if remaining < EMPTY_TAIL_TOLERANCE_SECONDS {
                    debug!("Dropping empty tail of {:.3}s", remaining);
                    break;
                }
                return Err(TranscodeError::EmptyOutput(path).into());
            }

            let chunk = Chunk {
                index,
                path,
                byte_size,
                duration_seconds: segment,
            };
            log_chunk(&chunk);
            chunks.push(chunk);
            start += segment;
        }

        Ok(chunks)
    }
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            debug!("Failed to remove empty cut {}: {}", redact_path(path), e);
        }
    }
}

fn log_chunk(chunk: &Chunk) {
    info!(
        "Chunk {}: {} bytes, {:.2}s, {}",
        chunk.index,
        chunk.byte_size,
        chunk.duration_seconds,
        redact_path(&chunk.path)
    );
}
