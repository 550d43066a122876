use crate::config::{Config, MediaConfig};
use crate::transcription::RetryPolicy;

/// The slice of [`Config`] a pipeline run needs.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub media: MediaConfig,
    pub max_concurrent_requests: usize,
    pub retry: RetryPolicy,
}

impl PipelineConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            media: config.media.clone(),
            max_concurrent_requests: config.transcription.max_concurrent_requests,
            retry: RetryPolicy::from(&config.transcription),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}
