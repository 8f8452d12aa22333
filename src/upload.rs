//! Upload client for the companion upload server

use crate::ai::http_client::build_client;
use crate::error::{PipelineError, PipelineResult};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Multipart field the server reads the file from
pub const UPLOAD_FIELD: &str = "image";

/// Anything that can publish a file and hand back its public URL
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(&self, path: &Path) -> PipelineResult<String>;
}

#[derive(Deserialize)]
struct UploadResponse {
    url: Option<String>,
    error: Option<String>,
}

/// Posts files as `multipart/form-data` to a configured endpoint
pub struct HttpUploader {
    client: Client,
    endpoint: String,
}

impl HttpUploader {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> PipelineResult<Self> {
        let endpoint = endpoint.into();
        if endpoint.trim().is_empty() {
            return Err(PipelineError::Config("upload server URL is empty".to_string()));
        }

        Ok(Self {
            client: build_client(timeout)?,
            endpoint,
        })
    }
}

#[async_trait]
impl Uploader for HttpUploader {
    async fn upload(&self, path: &Path) -> PipelineResult<String> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| PipelineError::Upload(format!("no file name in {}", path.display())))?;

        let bytes = tokio::fs::read(path).await.map_err(|e| PipelineError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mime_type = mime_guess::from_path(path).first_or_octet_stream();

        tracing::debug!("[Upload] Sending {} ({} bytes) to {}", file_name, bytes.len(), self.endpoint);

        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(mime_type.essence_str())
            .map_err(|e| PipelineError::Upload(format!("invalid MIME type: {}", e)))?;
        let form = Form::new().part(UPLOAD_FIELD, part);

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| PipelineError::Upload(format!("request failed: {}", e)))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let parsed = serde_json::from_str::<UploadResponse>(&body).ok();

        if !status.is_success() {
            let reason = parsed.and_then(|r| r.error).unwrap_or(body);
            return Err(PipelineError::Upload(format!("server error ({}): {}", status, reason)));
        }

        parsed
            .and_then(|r| r.url)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| PipelineError::Upload(format!("response has no url: {}", body)))
    }
}
