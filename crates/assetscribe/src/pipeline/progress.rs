use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Phase of job processing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Claimed,
    Downloading,
    Transcoding,
    Splitting,
    Transcribing,
    Persisting,
    Completed,
    Failed,
    Skipped,
}

impl std::fmt::Display for JobPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobPhase::Claimed => write!(f, "Claimed"),
            JobPhase::Downloading => write!(f, "Downloading"),
            JobPhase::Transcoding => write!(f, "Transcoding"),
            JobPhase::Splitting => write!(f, "Splitting"),
            JobPhase::Transcribing => write!(f, "Transcribing"),
            JobPhase::Persisting => write!(f, "Persisting"),
            JobPhase::Completed => write!(f, "Completed"),
            JobPhase::Failed => write!(f, "Failed"),
            JobPhase::Skipped => write!(f, "Skipped"),
        }
    }
}

/// Progress event for a job, as sent to observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressEvent {
    pub job_id: String,
    pub asset_id: String,
    pub phase: JobPhase,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// Number of chunks (set once splitting is done).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunks: Option<usize>,
    /// Error message (set on failure).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobProgressEvent {
    pub fn new(job_id: &str, asset_id: &str, phase: JobPhase, message: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            asset_id: asset_id.to_string(),
            phase,
            message: message.to_string(),
            timestamp: Utc::now(),
            chunks: None,
            error: None,
        }
    }
}

/// Events emitted by the pipeline and the controller during a job.
/// Transcript text is never included.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Phase { phase: JobPhase, message: String },
    Chunked { chunks: usize },
    Completed { chunks: usize, characters: usize },
    Skipped { reason: String },
    Failed { error: String },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// No-op reporter for unit tests.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Bridges pipeline events of one job to a broadcast channel.
pub struct BroadcastProgress {
    job_id: String,
    asset_id: String,
    sender: broadcast::Sender<JobProgressEvent>,
}

impl BroadcastProgress {
    pub fn new(job_id: &str, asset_id: &str, sender: broadcast::Sender<JobProgressEvent>) -> Self {
        Self {
            job_id: job_id.to_string(),
            asset_id: asset_id.to_string(),
            sender,
        }
    }

    fn send(&self, event: JobProgressEvent) {
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }
}

impl ProgressReporter for BroadcastProgress {
    fn report(&self, event: ProgressEvent) {
        let event = match event {
            ProgressEvent::Phase { phase, message } => {
                JobProgressEvent::new(&self.job_id, &self.asset_id, phase, &message)
            }
            ProgressEvent::Chunked { chunks } => {
                let mut e = JobProgressEvent::new(
                    &self.job_id,
                    &self.asset_id,
                    JobPhase::Splitting,
                    &format!("Split into {} chunks", chunks),
                );
                e.chunks = Some(chunks);
                e
            }
            ProgressEvent::Completed { chunks, characters } => {
                let mut e = JobProgressEvent::new(
                    &self.job_id,
                    &self.asset_id,
                    JobPhase::Completed,
                    &format!("Transcribed {} characters", characters),
                );
                e.chunks = Some(chunks);
                e
            }
            ProgressEvent::Skipped { reason } => {
                JobProgressEvent::new(&self.job_id, &self.asset_id, JobPhase::Skipped, &reason)
            }
            ProgressEvent::Failed { error } => {
                let mut e = JobProgressEvent::new(
                    &self.job_id,
                    &self.asset_id,
                    JobPhase::Failed,
                    "Job failed",
                );
                e.error = Some(error);
                e
            }
        };
        self.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_progress_maps_events() {
        let (tx, mut rx) = broadcast::channel(16);
        let progress = BroadcastProgress::new("job-1", "asset-1", tx);

        progress.report(ProgressEvent::Phase {
            phase: JobPhase::Downloading,
            message: "Downloading asset".to_string(),
        });
        progress.report(ProgressEvent::Chunked { chunks: 3 });
        progress.report(ProgressEvent::Failed {
            error: "boom".to_string(),
        });

        let first = rx.try_recv().unwrap();
        assert_eq!(first.phase, JobPhase::Downloading);
        assert_eq!(first.job_id, "job-1");
        assert_eq!(first.asset_id, "asset-1");

        let second = rx.try_recv().unwrap();
        assert_eq!(second.phase, JobPhase::Splitting);
        assert_eq!(second.chunks, Some(3));

        let third = rx.try_recv().unwrap();
        assert_eq!(third.phase, JobPhase::Failed);
        assert_eq!(third.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_report_without_subscribers_is_silent() {
        let (tx, rx) = broadcast::channel(4);
        drop(rx);
        let progress = BroadcastProgress::new("job-1", "asset-1", tx);
        progress.report(ProgressEvent::Skipped {
            reason: "image".to_string(),
        });
    }

    #[test]
    fn test_event_serializes_camel_case() {
        let event = JobProgressEvent::new("job-1", "asset-1", JobPhase::Transcribing, "go");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["jobId"], "job-1");
        assert_eq!(json["phase"], "transcribing");
        assert!(json.get("error").is_none());
    }
}
