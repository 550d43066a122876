use std::path::PathBuf;

use crate::media::Chunk;
use crate::worker::{Asset, MediaKind, ProcessingJob};

pub struct PipelineContext {
    // Input: the claimed job
    pub job: ProcessingJob,

    // Set once the asset record is resolved
    pub asset: Option<Asset>,
    pub media_kind: Option<MediaKind>,

    // Downloaded asset file inside the workspace (audio only; video stays in memory)
    pub source_path: Option<PathBuf>,

    pub chunks: Vec<Chunk>,

    // Assembled transcript, set before it is persisted
    pub transcript: Option<String>,
}

impl PipelineContext {
    pub fn new(job: ProcessingJob) -> Self {
        Self {
            job,
            asset: None,
            media_kind: None,
            source_path: None,
            chunks: Vec::new(),
            transcript: None,
        }
    }
}
