use std::time::Duration;

use async_trait::async_trait;
use reqwest::{multipart, Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};

use crate::config::TranscriptionConfig;
use crate::sanitize::truncate_body;
use crate::transcription::{TranscriptionError, TranscriptionService};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for an OpenAI-compatible `/audio/transcriptions` endpoint.
pub struct WhisperClient {
    client: Client,
    api_key: SecretString,
    base_url: String,
    model: String,
    language: Option<String>,
}

impl WhisperClient {
    pub fn new(
        api_key: SecretString,
        config: &TranscriptionConfig,
    ) -> Result<Self, TranscriptionError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| {
                TranscriptionError::Permanent(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            language: config.language.clone(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl TranscriptionService for WhisperClient {
    async fn transcribe(
        &self,
        audio: &[u8],
        file_name: &str,
    ) -> Result<String, TranscriptionError> {
        let url = format!("{}/audio/transcriptions", self.base_url);
        let mime = mime_guess::from_path(file_name).first_or_octet_stream();

        let file_part = multipart::Part::bytes(audio.to_vec())
            .file_name(file_name.to_string())
            .mime_str(mime.essence_str())
            .map_err(|e| TranscriptionError::Permanent(format!("mime: {}", e)))?;

        let mut form = multipart::Form::new()
            .text("model", self.model.clone())
            .text("response_format", "text")
            .part("file", file_part);
        if let Some(language) = &self.language {
            form = form.text("language", language.clone());
        }

        tracing::debug!(
            model = %self.model,
            file = file_name,
            bytes = audio.len(),
            "Sending chunk for transcription"
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.api_key.expose_secret())
            .multipart(form)
            .send()
            .await
            .map_err(classify_request_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let transcript = response.text().await.map_err(classify_request_error)?;

        tracing::debug!(
            file = file_name,
            chars = transcript.len(),
            "Chunk transcription received"
        );

        Ok(transcript.trim().to_string())
    }
}

/// Maps an unsuccessful HTTP status to a transient or permanent failure.
pub(crate) fn classify_status(status: StatusCode, body: &str) -> TranscriptionError {
    let message = format!("status {}: {}", status.as_u16(), truncate_body(body));
    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        TranscriptionError::Transient(message)
    } else {
        TranscriptionError::Permanent(message)
    }
}

pub(crate) fn classify_request_error(err: reqwest::Error) -> TranscriptionError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        TranscriptionError::Transient(format!("request: {}", err))
    } else {
        TranscriptionError::Permanent(format!("request: {}", err))
    }
}
