//! Stand-ins for ffmpeg and the speech-to-text service.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use assetscribe::media::{AudioFormat, MediaInfo, MediaTool};
use assetscribe::store::{JobStore, SqliteStore};
use assetscribe::transcription::{TranscriptionError, TranscriptionService};
use assetscribe::{JobStatus, ProcessingJob, StoreError, TranscodeError};

/// Every simulated stream encodes at this rate, so a file's duration is
/// its size divided by it.
pub const BYTES_PER_SECOND: f64 = 1000.0;

fn io_error(path: &Path, source: std::io::Error) -> TranscodeError {
    TranscodeError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn tool_failed(stderr: &str) -> TranscodeError {
    TranscodeError::ToolFailed {
        tool: "ffmpeg".to_string(),
        status: "exit status: 1".to_string(),
        stderr: stderr.to_string(),
    }
}

/// Constant-bitrate media tool. Inputs containing `CORRUPT` fail to decode,
/// inputs starting with `NOAUDIO` have no audio track.
pub struct ByteRateTool;

#[async_trait]
impl MediaTool for ByteRateTool {
    async fn probe(&self, path: &Path) -> Result<MediaInfo, TranscodeError> {
        let size_bytes = tokio::fs::metadata(path)
            .await
            .map_err(|e| io_error(path, e))?
            .len();
        let is_mp3 = path
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("mp3"));
        Ok(MediaInfo {
            duration_seconds: (size_bytes > 0).then(|| size_bytes as f64 / BYTES_PER_SECOND),
            size_bytes,
            audio_codec: Some(if is_mp3 { "mp3" } else { "pcm_s16le" }.to_string()),
        })
    }

    async fn transcode_audio(
        &self,
        input: &Path,
        output: &Path,
        _format: &AudioFormat,
    ) -> Result<(), TranscodeError> {
        let bytes = tokio::fs::read(input).await.map_err(|e| io_error(input, e))?;
        if bytes.windows(7).any(|w| w == b"CORRUPT") {
            return Err(tool_failed("Invalid data found when processing input"));
        }
        if bytes.starts_with(b"NOAUDIO") {
            return Err(tool_failed("Output file does not contain any stream"));
        }
        tokio::fs::write(output, &bytes)
            .await
            .map_err(|e| io_error(output, e))
    }

    async fn cut(
        &self,
        input: &Path,
        output: &Path,
        start: f64,
        duration: f64,
    ) -> Result<(), TranscodeError> {
        let total = self.probe(input).await?.duration_seconds.unwrap_or(0.0);
        let actual = duration.min(total - start).max(0.0);
        let size = (actual * BYTES_PER_SECOND).round() as usize;
        tokio::fs::write(output, vec![0u8; size])
            .await
            .map_err(|e| io_error(output, e))
    }

    async fn extract_audio(
        &self,
        input: &[u8],
        output: &Path,
        _format: &AudioFormat,
    ) -> Result<(), TranscodeError> {
        if input.starts_with(b"NOAUDIO") {
            return Err(tool_failed("Output file does not contain any stream"));
        }
        tokio::fs::write(output, input)
            .await
            .map_err(|e| io_error(output, e))
    }
}

/// Returns `segment <index>` for each chunk, optionally failing the first
/// calls transiently, stalling every call or crashing.
pub struct ScriptedTranscriber {
    transient_failures: AtomicUsize,
    delay: Option<Duration>,
    stagger: bool,
    crash: bool,
    calls: AtomicUsize,
    started: Notify,
}

impl ScriptedTranscriber {
    pub fn new() -> Self {
        Self {
            transient_failures: AtomicUsize::new(0),
            delay: None,
            stagger: false,
            crash: false,
            calls: AtomicUsize::new(0),
            started: Notify::new(),
        }
    }

    /// Fails the first `n` calls with a transient error.
    pub fn failing_first(n: usize) -> Self {
        let me = Self::new();
        me.transient_failures.store(n, Ordering::SeqCst);
        me
    }

    /// Sleeps `delay` inside every call.
    pub fn stalled(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new()
        }
    }

    /// Lower chunk indices finish later, so completion order is reversed.
    pub fn staggered() -> Self {
        Self {
            stagger: true,
            ..Self::new()
        }
    }

    /// Panics inside every call.
    pub fn crashing() -> Self {
        Self {
            crash: true,
            ..Self::new()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Resolves once the first call has started.
    pub async fn wait_started(&self) {
        self.started.notified().await;
    }
}

/// `talk_audio_3.mp3` -> 3
pub fn chunk_index(file_name: &str) -> Option<usize> {
    file_name
        .rsplit_once("_audio_")
        .and_then(|(_, rest)| rest.split('.').next())
        .and_then(|index| index.parse().ok())
}

#[async_trait]
impl TranscriptionService for ScriptedTranscriber {
    async fn transcribe(
        &self,
        _audio: &[u8],
        file_name: &str,
    ) -> Result<String, TranscriptionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();

        let index = chunk_index(file_name)
            .ok_or_else(|| TranscriptionError::Permanent(format!("odd name {}", file_name)))?;

        if self.crash {
            panic!("decoder state corrupted");
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.stagger {
            let wait = 40u64.saturating_sub(index as u64 * 5);
            tokio::time::sleep(Duration::from_millis(wait)).await;
        }

        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(TranscriptionError::Transient(
                "status 503: upstream unavailable".to_string(),
            ));
        }

        Ok(format!("segment {}", index))
    }
}

/// SQLite-backed job store whose `finish` answers 503 a set number of times.
pub struct FlakyFinishStore {
    inner: SqliteStore,
    failures: AtomicUsize,
    finish_calls: AtomicUsize,
}

impl FlakyFinishStore {
    pub fn new(inner: SqliteStore, failures: usize) -> Self {
        Self {
            inner,
            failures: AtomicUsize::new(failures),
            finish_calls: AtomicUsize::new(0),
        }
    }

    pub fn finish_calls(&self) -> usize {
        self.finish_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobStore for FlakyFinishStore {
    async fn list_active(&self) -> Result<Vec<ProcessingJob>, StoreError> {
        self.inner.list_active().await
    }

    async fn claim(
        &self,
        job: &ProcessingJob,
        at: DateTime<Utc>,
    ) -> Result<ProcessingJob, StoreError> {
        self.inner.claim(job, at).await
    }

    async fn heartbeat(&self, job_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.inner.heartbeat(job_id, at).await
    }

    async fn finish(
        &self,
        job_id: &str,
        status: JobStatus,
        error_message: Option<&str>,
    ) -> Result<(), StoreError> {
        self.finish_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::UnexpectedStatus {
                status: 503,
                url: format!("http://localhost:3000/api/asset-processing-job/{}", job_id),
                body: "upstream unavailable".to_string(),
            });
        }
        self.inner.finish(job_id, status, error_message).await
    }
}
