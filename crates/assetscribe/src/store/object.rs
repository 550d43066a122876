use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::sanitize::{redact_url, truncate_body};
use crate::store::{ObjectStorage, StoreError};

/// Fetches asset bytes from `http(s)://` or `file://` URLs.
pub struct UrlObjectStorage {
    client: Client,
}

impl UrlObjectStorage {
    pub fn new(timeout: Duration) -> Result<Self, StoreError> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
        })
    }

    async fn fetch_http(&self, url: &str) -> Result<Vec<u8>, StoreError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::UnexpectedStatus {
                status: status.as_u16(),
                url: redact_url(url),
                body: truncate_body(&body),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl ObjectStorage for UrlObjectStorage {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, StoreError> {
        let bytes = if let Some(path) = url.strip_prefix("file://") {
            let path = PathBuf::from(path);
            tokio::fs::read(&path)
                .await
                .map_err(|e| StoreError::Io { path, source: e })?
        } else if url.starts_with("http://") || url.starts_with("https://") {
            self.fetch_http(url).await?
        } else {
            return Err(StoreError::UnsupportedUrl(redact_url(url)));
        };

        log::debug!("Fetched {} bytes from {}", bytes.len(), redact_url(url));
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn storage() -> UrlObjectStorage {
        UrlObjectStorage::new(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_file_url() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("talk.mp3");
        std::fs::write(&file, b"ID3 audio").unwrap();

        let url = format!("file://{}", file.display());
        let bytes = storage().fetch(&url).await.unwrap();
        assert_eq!(bytes, b"ID3 audio");
    }

    #[tokio::test]
    async fn test_fetch_missing_file() {
        let result = storage().fetch("file:///nonexistent/assetscribe/x.mp3").await;
        assert!(matches!(result, Err(StoreError::Io { .. })));
    }

    #[tokio::test]
    async fn test_fetch_unsupported_scheme_hides_query() {
        let err = storage()
            .fetch("ftp://host/file.mp3?sig=secret")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedUrl(_)));
        assert!(!err.to_string().contains("secret"));
    }

    #[tokio::test]
    async fn test_fetch_http_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/blobs/talk.mp3"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"remote".to_vec()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/blobs/gone.mp3"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let store = storage();
        let bytes = store
            .fetch(&format!("{}/blobs/talk.mp3?token=abc", server.uri()))
            .await
            .unwrap();
        assert_eq!(bytes, b"remote");

        let err = store
            .fetch(&format!("{}/blobs/gone.mp3?token=abc", server.uri()))
            .await
            .unwrap_err();
        match err {
            StoreError::UnexpectedStatus { status, url, .. } => {
                assert_eq!(status, 403);
                assert!(!url.contains("token"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
