//! Gemini Files API ingestion.
//!
//! Uploads use the resumable protocol: a `start` request returns an upload
//! session URL, and a single `upload, finalize` request sends the bytes.
//! Processing state is then read from `v1beta/{name}`.

use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use parley_traits::{FileIngestor, IngestHandle, IngestStatus};
use reqwest::{Client, Response};
use serde::Deserialize;
use tracing::debug;

pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com";
const API_TIMEOUT_SECS: u64 = 120;
const UPLOAD_URL_HEADER: &str = "x-goog-upload-url";
/// Error bodies are cut to this many bytes.
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Deserialize)]
struct UploadResponse {
    file: GeminiFile,
}

#[derive(Debug, Deserialize)]
struct GeminiFile {
    name: String,
    uri: Option<String>,
    state: Option<String>,
    error: Option<GeminiStatusError>,
}

#[derive(Debug, Deserialize)]
struct GeminiStatusError {
    message: Option<String>,
}

impl GeminiFile {
    fn status(self) -> IngestStatus {
        match self.state.as_deref() {
            Some("ACTIVE") => match self.uri {
                Some(uri) => IngestStatus::Ready { uri },
                None => IngestStatus::Failed {
                    reason: format!("{} is active but has no uri", self.name),
                },
            },
            Some("FAILED") => IngestStatus::Failed {
                reason: self
                    .error
                    .and_then(|error| error.message)
                    .unwrap_or_else(|| "processing failed".to_string()),
            },
            _ => IngestStatus::Processing,
        }
    }
}

#[derive(Clone)]
pub struct GeminiFileIngestor {
    client: Client,
    api_key: String,
    api_base: String,
}

impl std::fmt::Debug for GeminiFileIngestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiFileIngestor")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

impl GeminiFileIngestor {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_api_base(api_key, GEMINI_API_BASE)
    }

    pub fn with_api_base(api_key: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    async fn start_session(&self, size: usize, mime_type: &str, display_name: &str) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/upload/v1beta/files", self.api_base))
            .header("x-goog-api-key", &self.api_key)
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", size.to_string())
            .header("X-Goog-Upload-Header-Content-Type", mime_type)
            .json(&serde_json::json!({ "file": { "display_name": display_name } }))
            .timeout(Duration::from_secs(API_TIMEOUT_SECS))
            .send()
            .await
            .context("Upload start request failed")?;
        let response = ensure_success(response, "upload start").await?;

        response
            .headers()
            .get(UPLOAD_URL_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Upload start response has no {UPLOAD_URL_HEADER} header"))
    }
}

async fn ensure_success(response: Response, action: &str) -> Result<Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
        body.push_str("... [truncated]");
    }
    bail!("Gemini {action} failed ({status}): {body}")
}

#[async_trait]
impl FileIngestor for GeminiFileIngestor {
    async fn upload(
        &self,
        bytes: Vec<u8>,
        mime_type: &str,
        display_name: &str,
    ) -> Result<IngestHandle> {
        let size = bytes.len();
        let upload_url = self.start_session(size, mime_type, display_name).await?;

        let response = self
            .client
            .post(&upload_url)
            .header("Content-Length", size.to_string())
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(bytes)
            .timeout(Duration::from_secs(API_TIMEOUT_SECS))
            .send()
            .await
            .context("Upload request failed")?;
        let response = ensure_success(response, "upload").await?;

        let uploaded: UploadResponse = response.json().await.context("Invalid upload response")?;
        debug!(name = %uploaded.file.name, bytes = size, "Uploaded file to Gemini");
        Ok(IngestHandle {
            name: uploaded.file.name,
            uri: uploaded.file.uri,
        })
    }

    async fn status(&self, handle: &IngestHandle) -> Result<IngestStatus> {
        let response = self
            .client
            .get(format!("{}/v1beta/{}", self.api_base, handle.name))
            .header("x-goog-api-key", &self.api_key)
            .timeout(Duration::from_secs(API_TIMEOUT_SECS))
            .send()
            .await
            .context("File status request failed")?;
        let response = ensure_success(response, "file status").await?;

        let file: GeminiFile = response.json().await.context("Invalid file status response")?;
        Ok(file.status())
    }
}
