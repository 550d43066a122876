//! The external transcoding tool.
//!
//! [`MediaTool`] is the seam between the media pipeline and ffmpeg/ffprobe;
//! tests substitute a simulated implementation.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use log::debug;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::MediaConfig;
use crate::error::TranscodeError;
use crate::sanitize::redact_path;

/// Upper bound on the stderr excerpt kept in errors.
const STDERR_TAIL_CHARS: usize = 600;

/// What a probe learned about a media file.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaInfo {
    /// `None` when the container does not report a duration.
    pub duration_seconds: Option<f64>,
    pub size_bytes: u64,
    /// ffprobe `codec_name` of the first audio stream.
    pub audio_codec: Option<String>,
}

/// Target encoding for normalized audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFormat {
    pub extension: String,
    pub codec: String,
    pub bitrate: String,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            extension: "mp3".to_string(),
            codec: "libmp3lame".to_string(),
            bitrate: "192k".to_string(),
        }
    }
}

impl AudioFormat {
    /// The `codec_name` ffprobe reports for streams written by this encoder.
    pub fn stream_codec(&self) -> &str {
        match self.codec.as_str() {
            "libmp3lame" | "libshine" => "mp3",
            "libfdk_aac" => "aac",
            "libopus" => "opus",
            "libvorbis" => "vorbis",
            other => other,
        }
    }
}

impl From<&MediaConfig> for AudioFormat {
    fn from(config: &MediaConfig) -> Self {
        Self {
            extension: config.audio_extension.to_ascii_lowercase(),
            codec: config.audio_codec.clone(),
            bitrate: config.audio_bitrate.clone(),
        }
    }
}

#[async_trait]
pub trait MediaTool: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<MediaInfo, TranscodeError>;

    /// Re-encodes the audio track of `input` into `output`, dropping video.
    async fn transcode_audio(
        &self,
        input: &Path,
        output: &Path,
        format: &AudioFormat,
    ) -> Result<(), TranscodeError>;

    /// Stream-copies `duration` seconds of `input`, starting at `start`.
    async fn cut(
        &self,
        input: &Path,
        output: &Path,
        start: f64,
        duration: f64,
    ) -> Result<(), TranscodeError>;

    /// Encodes the audio track of an in-memory container, fed through stdin.
    async fn extract_audio(
        &self,
        input: &[u8],
        output: &Path,
        format: &AudioFormat,
    ) -> Result<(), TranscodeError>;
}

/// ffmpeg/ffprobe run as async subprocesses.
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    ffmpeg_path: PathBuf,
    ffprobe_path: PathBuf,
}

impl Default for Ffmpeg {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

impl Ffmpeg {
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(ffmpeg_path: P, ffprobe_path: Q) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            ffprobe_path: ffprobe_path.into(),
        }
    }

    pub fn from_config(config: &MediaConfig) -> Self {
        Self::new(&config.ffmpeg_path, &config.ffprobe_path)
    }

    fn ffmpeg(&self) -> Command {
        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.args(["-hide_banner", "-nostdin", "-loglevel", "error", "-y"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn run(&self, mut cmd: Command, tool: &str) -> Result<Vec<u8>, TranscodeError> {
        let output = cmd.output().await.map_err(|e| TranscodeError::Spawn {
            tool: tool.to_string(),
            source: e,
        })?;

        if !output.status.success() {
            return Err(TranscodeError::ToolFailed {
                tool: tool.to_string(),
                status: output.status.to_string(),
                stderr: stderr_tail(&output.stderr),
            });
        }

        Ok(output.stdout)
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    format: Option<ProbeFormat>,
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    #[serde(default)]
    codec_type: Option<String>,
    #[serde(default)]
    codec_name: Option<String>,
}

impl ProbeOutput {
    fn audio_codec(&self) -> Option<String> {
        self.streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some("audio"))
            .and_then(|s| s.codec_name.clone())
    }
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    #[serde(default)]
    duration: Option<String>,
    #[serde(default)]
    size: Option<String>,
}

#[async_trait]
impl MediaTool for Ffmpeg {
    async fn probe(&self, path: &Path) -> Result<MediaInfo, TranscodeError> {
        let mut cmd = Command::new(&self.ffprobe_path);
        cmd.args([
            "-v",
            "error",
            "-show_entries",
            "format=duration,size:stream=codec_type,codec_name",
            "-of",
            "json",
        ])
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let stdout = self.run(cmd, "ffprobe").await?;
        let parsed: ProbeOutput =
            serde_json::from_slice(&stdout).map_err(|e| TranscodeError::Probe {
                path: path.to_path_buf(),
                reason: format!("unreadable ffprobe output: {}", e),
            })?;

        let audio_codec = parsed.audio_codec();
        let format = parsed.format.unwrap_or(ProbeFormat {
            duration: None,
            size: None,
        });
        let duration_seconds = format
            .duration
            .as_deref()
            .and_then(|d| d.trim().parse::<f64>().ok())
            .filter(|d| d.is_finite());

        let size_bytes = match format.size.as_deref().and_then(|s| s.trim().parse::<u64>().ok()) {
            Some(size) => size,
            None => file_size(path).await?,
        };

        debug!(
            "Probed {}: duration={:?}s size={}B codec={:?}",
            redact_path(path),
            duration_seconds,
            size_bytes,
            audio_codec
        );

        Ok(MediaInfo {
            duration_seconds,
            size_bytes,
            audio_codec,
        })
    }

    async fn transcode_audio(
        &self,
        input: &Path,
        output: &Path,
        format: &AudioFormat,
    ) -> Result<(), TranscodeError> {
        let mut cmd = self.ffmpeg();
        cmd.arg("-i")
            .arg(input)
            .args([
                "-vn",
                "-acodec",
                format.codec.as_str(),
                "-b:a",
                format.bitrate.as_str(),
            ])
            .arg(output);
        self.run(cmd, "ffmpeg").await.map(|_| ())
    }

    async fn cut(
        &self,
        input: &Path,
        output: &Path,
        start: f64,
        duration: f64,
    ) -> Result<(), TranscodeError> {
        let mut cmd = self.ffmpeg();
        let start = format!("{:.3}", start);
        let duration = format!("{:.3}", duration);
        cmd.args(["-ss", start.as_str(), "-t", duration.as_str()])
            .arg("-i")
            .arg(input)
            .args(["-vn", "-c", "copy"])
            .arg(output);
        self.run(cmd, "ffmpeg").await.map(|_| ())
    }

    async fn extract_audio(
        &self,
        input: &[u8],
        output: &Path,
        format: &AudioFormat,
    ) -> Result<(), TranscodeError> {
        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.args(["-hide_banner", "-loglevel", "error", "-y", "-i", "pipe:0"])
            .args([
                "-vn",
                "-acodec",
                format.codec.as_str(),
                "-b:a",
                format.bitrate.as_str(),
            ])
            .arg(output)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| TranscodeError::Spawn {
            tool: "ffmpeg".to_string(),
            source: e,
        })?;
        let mut stdin = child.stdin.take().ok_or_else(|| TranscodeError::ToolFailed {
            tool: "ffmpeg".to_string(),
            status: "no stdin".to_string(),
            stderr: String::new(),
        })?;

        // stdin is fed while stderr drains, so neither pipe can fill up and stall.
        let feed = async move {
            let result = stdin.write_all(input).await;
            drop(stdin);
            result
        };
        let (fed, waited) = tokio::join!(feed, child.wait_with_output());

        let out = waited.map_err(|e| TranscodeError::Io {
            path: output.to_path_buf(),
            source: e,
        })?;

        if !out.status.success() {
            return Err(TranscodeError::ToolFailed {
                tool: "ffmpeg".to_string(),
                status: out.status.to_string(),
                stderr: stderr_tail(&out.stderr),
            });
        }

        // ffmpeg may stop reading once it has what it needs; a broken pipe
        // after a successful exit is not a failure.
        match fed {
            Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => Err(TranscodeError::Io {
                path: output.to_path_buf(),
                source: e,
            }),
            _ => Ok(()),
        }
    }
}

pub(crate) async fn file_size(path: &Path) -> Result<u64, TranscodeError> {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.len())
        .map_err(|e| TranscodeError::Io {
            path: path.to_path_buf(),
            source: e,
        })
}

/// Last few hundred characters of a tool's stderr, trimmed.
pub(crate) fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    let count = text.chars().count();
    if count <= STDERR_TAIL_CHARS {
        return text.to_string();
    }
    let tail: String = text.chars().skip(count - STDERR_TAIL_CHARS).collect();
    format!("...{}", tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stderr_tail_short() {
        assert_eq!(stderr_tail(b"  Invalid data found\n"), "Invalid data found");
    }

    #[test]
    fn test_stderr_tail_long() {
        let long = "x".repeat(2_000) + "END";
        let tail = stderr_tail(long.as_bytes());
        assert!(tail.starts_with("..."));
        assert!(tail.ends_with("END"));
        assert_eq!(tail.chars().count(), STDERR_TAIL_CHARS + 3);
    }

    #[test]
    fn test_audio_format_from_config() {
        let config = MediaConfig {
            audio_extension: "MP3".to_string(),
            audio_bitrate: "128k".to_string(),
            ..MediaConfig::default()
        };
        let format = AudioFormat::from(&config);
        assert_eq!(format.extension, "mp3");
        assert_eq!(format.codec, "libmp3lame");
        assert_eq!(format.bitrate, "128k");
    }

    #[test]
    fn test_probe_output_parsing() {
        let parsed: ProbeOutput =
            serde_json::from_str(r#"{"format": {"duration": "61.250000", "size": "980000"}}"#)
                .unwrap();
        let format = parsed.format.unwrap();
        assert_eq!(format.duration.as_deref(), Some("61.250000"));
        assert_eq!(format.size.as_deref(), Some("980000"));

        let empty: ProbeOutput = serde_json::from_str("{}").unwrap();
        assert!(empty.format.is_none());
        assert!(empty.audio_codec().is_none());
    }

    #[test]
    fn test_first_audio_stream_codec_is_reported() {
        let parsed: ProbeOutput = serde_json::from_str(
            r#"{
                "streams": [
                    {"codec_type": "video", "codec_name": "h264"},
                    {"codec_type": "audio", "codec_name": "aac"}
                ],
                "format": {"duration": "12.0", "size": "4096"}
            }"#,
        )
        .unwrap();
        assert_eq!(parsed.audio_codec().as_deref(), Some("aac"));
    }

    #[test]
    fn test_stream_codec_maps_encoder_names() {
        assert_eq!(AudioFormat::default().stream_codec(), "mp3");
        let aac = AudioFormat {
            extension: "m4a".to_string(),
            codec: "aac".to_string(),
            bitrate: "128k".to_string(),
        };
        assert_eq!(aac.stream_codec(), "aac");
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let tool = Ffmpeg::new(
            "/nonexistent/assetscribe-ffmpeg",
            "/nonexistent/assetscribe-ffprobe",
        );
        let result = tool.probe(Path::new("/tmp/whatever.mp3")).await;
        assert!(matches!(result, Err(TranscodeError::Spawn { .. })));
    }
}
