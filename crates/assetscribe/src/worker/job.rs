use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a processing job.
///
/// pending → processing → completed | failed. The only backward move is an
/// external requeue of a stale processing job to pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[serde(alias = "created", alias = "stuck")]
    Pending,
    #[serde(alias = "in_progress")]
    Processing,
    Completed,
    #[serde(alias = "max_attempts_exceeded")]
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" | "created" | "stuck" => Ok(JobStatus::Pending),
            "processing" | "in_progress" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" | "max_attempts_exceeded" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingJob {
    pub id: String,
    pub asset_id: String,
    #[serde(default)]
    pub project_id: Option<String>,
    pub status: JobStatus,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, rename = "lastHeartBeat", alias = "lastHeartbeat")]
    pub last_heartbeat: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub id: String,
    #[serde(default)]
    pub project_id: Option<String>,
    pub file_name: String,
    pub file_type: String,
    pub file_url: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub content: Option<String>,
}

/// How an asset is processed, decided once per job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
    Unsupported,
}

impl MediaKind {
    /// Classifies by the asset's `fileType`, falling back to the MIME type
    /// (stored, then guessed from the file name) for unrecognized values.
    pub fn classify(asset: &Asset) -> Self {
        match asset.file_type.trim().to_ascii_lowercase().as_str() {
            "audio" => return MediaKind::Audio,
            "video" => return MediaKind::Video,
            "text" | "markdown" | "image" => return MediaKind::Unsupported,
            _ => {}
        }

        let mime = asset
            .mime_type
            .as_deref()
            .map(str::to_ascii_lowercase)
            .or_else(|| {
                mime_guess::from_path(&asset.file_name)
                    .first()
                    .map(|m| m.essence_str().to_string())
            });

        match mime.as_deref() {
            Some(m) if m.starts_with("audio/") => MediaKind::Audio,
            Some(m) if m.starts_with("video/") => MediaKind::Video,
            _ => MediaKind::Unsupported,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
            MediaKind::Unsupported => "unsupported",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
