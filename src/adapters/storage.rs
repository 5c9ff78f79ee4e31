//! Object storage over plain HTTP.
//!
//! Blobs are written with `PUT {endpoint}/{bucket}/{key}`, which S3-compatible
//! gateways and most blob proxies accept. Re-uploading the same key
//! overwrites, so publishing can be repeated.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

use crate::config::StorageSettings;

use super::ObjectStore;

pub struct HttpObjectStore {
    endpoint: String,
    bucket: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpObjectStore {
    pub fn new(settings: &StorageSettings) -> Self {
        Self {
            endpoint: settings.endpoint.trim_end_matches('/').to_string(),
            bucket: settings.bucket.clone(),
            token: settings.token.clone(),
            client: reqwest::Client::new(),
        }
    }

    /// URL of an object
    pub fn object_url(&self, key: &str) -> String {
        format!(
            "{}/{}/{}",
            self.endpoint,
            self.bucket,
            key.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn upload(&self, path: &Path, key: &str, content_type: &str) -> Result<()> {
        let body = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;

        let url = self.object_url(key);
        let mut request = self
            .client
            .put(&url)
            .header(CONTENT_TYPE, content_type)
            .body(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to upload {}", key))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Upload of {} rejected with {}: {}", key, status, text.trim());
        }

        debug!(key, %status, "Uploaded object");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_url() {
        let store = HttpObjectStore::new(&StorageSettings {
            endpoint: "https://blobs.example.com/".to_string(),
            bucket: "captions".to_string(),
            ..Default::default()
        });

        assert_eq!(
            store.object_url("/captions/ep42.vtt"),
            "https://blobs.example.com/captions/captions/ep42.vtt"
        );
    }

    #[tokio::test]
    async fn test_missing_file_fails_before_request() {
        let store = HttpObjectStore::new(&StorageSettings::default());
        let err = store
            .upload(Path::new("/nonexistent/ep42.vtt"), "ep42.vtt", "text/vtt")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to read"));
    }
}
