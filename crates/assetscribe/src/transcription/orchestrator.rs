use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use futures_util::future::{BoxFuture, FutureExt};
use tracing::{debug, info, warn};

use crate::config::TranscriptionConfig;
use crate::media::Chunk;
use crate::sanitize::redact_path;
use crate::transcription::{TranscriptionError, TranscriptionService};

/// Retry schedule for transient failures of a single chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total tries per chunk, including the first.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl From<&TranscriptionConfig> for RetryPolicy {
    fn from(config: &TranscriptionConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based): 1x, 2x, 4x ... of the
    /// initial backoff, capped at `max_backoff`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

/// Transcribes chunks concurrently and reassembles them in index order.
pub struct TranscriptionOrchestrator {
    service: Arc<dyn TranscriptionService>,
    max_concurrent: usize,
    retry: RetryPolicy,
}

impl TranscriptionOrchestrator {
    pub fn new(
        service: Arc<dyn TranscriptionService>,
        max_concurrent: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            service,
            max_concurrent: max_concurrent.max(1),
            retry,
        }
    }

    /// Returns the transcript of all chunks, joined by single spaces in
    /// chunk order regardless of completion order.
    ///
    /// The first chunk that fails ends the call; requests still in flight are
    /// dropped with the stream.
    pub async fn transcribe_all(&self, chunks: &[Chunk]) -> Result<String, TranscriptionError> {
        if chunks.is_empty() {
            return Ok(String::new());
        }

        info!(
            chunks = chunks.len(),
            concurrency = self.max_concurrent,
            "Transcribing chunks"
        );

        let mut slots: Vec<Option<String>> = vec![None; chunks.len()];
        let requests: Vec<BoxFuture<'_, Result<(usize, String), TranscriptionError>>> = chunks
            .iter()
            .map(|chunk| self.transcribe_chunk(chunk).boxed())
            .collect();
        let mut results = stream::iter(requests).buffer_unordered(self.max_concurrent);

        while let Some(result) = results.next().await {
            let (index, text) = result?;
            match slots.get_mut(index) {
                Some(slot) => *slot = Some(text),
                None => {
                    return Err(TranscriptionError::Failed {
                        index,
                        message: format!("index outside of {} chunks", chunks.len()),
                    })
                }
            }
        }

        assemble(slots)
    }

    async fn transcribe_chunk(&self, chunk: &Chunk) -> Result<(usize, String), TranscriptionError> {
        let audio = tokio::fs::read(&chunk.path)
            .await
            .map_err(|e| TranscriptionError::ReadChunk {
                index: chunk.index,
                path: chunk.path.clone(),
                source: e,
            })?;
        let file_name = redact_path(&chunk.path);

        let mut attempt = 1;
        loop {
            match self.service.transcribe(&audio, &file_name).await {
                Ok(text) => {
                    debug!(index = chunk.index, attempt, chars = text.len(), "Chunk transcribed");
                    return Ok((chunk.index, text));
                }
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.backoff_for(attempt);
                    warn!(
                        index = chunk.index,
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Transient transcription failure, retrying: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) if e.is_transient() => {
                    return Err(TranscriptionError::Exhausted {
                        index: chunk.index,
                        attempts: attempt,
                        message: e.to_string(),
                    })
                }
                Err(e) => {
                    return Err(TranscriptionError::Failed {
                        index: chunk.index,
                        message: e.to_string(),
                    })
                }
            }
        }
    }
}

fn assemble(slots: Vec<Option<String>>) -> Result<String, TranscriptionError> {
    let mut parts = Vec::with_capacity(slots.len());
    for (index, slot) in slots.into_iter().enumerate() {
        let text = slot.ok_or_else(|| TranscriptionError::Failed {
            index,
            message: "no transcript produced".to_string(),
        })?;
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            parts.push(trimmed.to_string());
        }
    }
    Ok(parts.join(" "))
}
