//! REST adapter for the CRUD application that owns jobs and assets.
//!
//! Compare-and-set is delegated to the server through `expectedStatus`:
//! it answers 409 when the stored status does not match.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use crate::sanitize::{redact_url, truncate_body};
use crate::store::{AssetStore, JobStore, StoreError};
use crate::worker::{Asset, JobStatus, ProcessingJob};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JobPatch<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<JobStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    attempts: Option<u32>,
    #[serde(rename = "lastHeartBeat", skip_serializing_if = "Option::is_none")]
    last_heartbeat: Option<DateTime<Utc>>,
    expected_status: JobStatus,
}

#[derive(Debug, Serialize)]
struct ContentPatch<'a> {
    content: &'a str,
}

pub struct ApiClient {
    client: Client,
    base_url: String,
    api_key: Option<SecretString>,
}

impl ApiClient {
    pub fn new(
        base_url: &str,
        api_key: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn jobs_url(&self) -> String {
        format!("{}/api/asset-processing-job", self.base_url)
    }

    fn job_url(&self, id: &str) -> String {
        format!("{}/api/asset-processing-job/{}", self.base_url, id)
    }

    fn asset_url(&self, id: &str) -> String {
        format!("{}/api/asset/{}", self.base_url, id)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key.expose_secret()),
            None => request,
        }
    }

    async fn patch_job(&self, id: &str, patch: &JobPatch<'_>) -> Result<Response, StoreError> {
        let url = self.job_url(id);
        tracing::trace!(job_id = id, expected = %patch.expected_status, "PATCH job");

        let response = self
            .authorized(self.client.patch(&url))
            .json(patch)
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(StoreError::NotFound {
                kind: "Job",
                id: id.to_string(),
            }),
            StatusCode::CONFLICT if patch.expected_status == JobStatus::Pending => {
                Err(StoreError::ClaimConflict {
                    job_id: id.to_string(),
                })
            }
            StatusCode::CONFLICT => Err(StoreError::Conflict {
                job_id: id.to_string(),
                expected: patch.expected_status,
            }),
            _ => expect_success(response, &url).await,
        }
    }
}

async fn expect_success(response: Response, url: &str) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(StoreError::UnexpectedStatus {
        status: status.as_u16(),
        url: redact_url(url),
        body: truncate_body(&body),
    })
}

#[async_trait]
impl JobStore for ApiClient {
    async fn list_active(&self) -> Result<Vec<ProcessingJob>, StoreError> {
        let url = self.jobs_url();
        let response = self.authorized(self.client.get(&url)).send().await?;
        let response = expect_success(response, &url).await?;

        let jobs: Vec<ProcessingJob> = response
            .json()
            .await
            .map_err(|e| StoreError::Decode(format!("job list: {}", e)))?;

        Ok(jobs
            .into_iter()
            .filter(|job| !job.status.is_terminal())
            .collect())
    }

    async fn claim(
        &self,
        job: &ProcessingJob,
        at: DateTime<Utc>,
    ) -> Result<ProcessingJob, StoreError> {
        let patch = JobPatch {
            status: Some(JobStatus::Processing),
            error_message: None,
            attempts: Some(job.attempts.saturating_add(1)),
            last_heartbeat: Some(at),
            expected_status: JobStatus::Pending,
        };
        let response = self.patch_job(&job.id, &patch).await?;

        response
            .json()
            .await
            .map_err(|e| StoreError::Decode(format!("claimed job: {}", e)))
    }

    async fn heartbeat(&self, job_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let patch = JobPatch {
            status: None,
            error_message: None,
            attempts: None,
            last_heartbeat: Some(at),
            expected_status: JobStatus::Processing,
        };
        self.patch_job(job_id, &patch).await.map(|_| ())
    }

    async fn finish(
        &self,
        job_id: &str,
        status: JobStatus,
        error_message: Option<&str>,
    ) -> Result<(), StoreError> {
        if !status.is_terminal() {
            return Err(StoreError::InvalidTransition { to: status });
        }
        let patch = JobPatch {
            status: Some(status),
            error_message,
            attempts: None,
            last_heartbeat: None,
            expected_status: JobStatus::Processing,
        };
        self.patch_job(job_id, &patch).await.map(|_| ())
    }
}

#[async_trait]
impl AssetStore for ApiClient {
    async fn get_asset(&self, asset_id: &str) -> Result<Asset, StoreError> {
        let url = self.asset_url(asset_id);
        let response = self.authorized(self.client.get(&url)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound {
                kind: "Asset",
                id: asset_id.to_string(),
            });
        }
        let response = expect_success(response, &url).await?;

        response
            .json()
            .await
            .map_err(|e| StoreError::Decode(format!("asset: {}", e)))
    }

    async fn set_content(&self, asset_id: &str, content: &str) -> Result<(), StoreError> {
        let url = self.asset_url(asset_id);
        let response = self
            .authorized(self.client.patch(&url))
            .json(&ContentPatch { content })
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound {
                kind: "Asset",
                id: asset_id.to_string(),
            });
        }
        expect_success(response, &url).await.map(|_| ())
    }
}
