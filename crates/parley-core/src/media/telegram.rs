//! Telegram Bot API file retrieval.

use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use parley_traits::MediaSource;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";
/// Default timeout for Telegram API calls (seconds)
const API_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
struct TelegramResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TelegramFile {
    file_path: Option<String>,
}

/// Fetches file bytes through `getFile` and the file download endpoint.
#[derive(Clone)]
pub struct TelegramMediaSource {
    client: Client,
    bot_token: String,
    api_base: String,
}

impl std::fmt::Debug for TelegramMediaSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramMediaSource")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

impl TelegramMediaSource {
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self::with_api_base(bot_token, TELEGRAM_API_BASE)
    }

    pub fn with_api_base(bot_token: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            bot_token: bot_token.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.bot_token, method)
    }

    fn file_url(&self, file_path: &str) -> String {
        format!("{}/file/bot{}/{}", self.api_base, self.bot_token, file_path)
    }

    async fn file_path(&self, file_id: &str) -> Result<String> {
        let response = self
            .client
            .post(self.api_url("getFile"))
            .json(&serde_json::json!({ "file_id": file_id }))
            .timeout(Duration::from_secs(API_TIMEOUT_SECS))
            .send()
            .await
            .context("getFile request failed")?;

        let body: TelegramResponse<TelegramFile> =
            response.json().await.context("Invalid getFile response")?;
        if !body.ok {
            return Err(anyhow!(
                "Telegram API error: {}",
                body.description.unwrap_or_default()
            ));
        }

        body.result
            .and_then(|file| file.file_path)
            .ok_or_else(|| anyhow!("Telegram returned no file path for {file_id}"))
    }
}

#[async_trait]
impl MediaSource for TelegramMediaSource {
    async fn fetch(&self, file_id: &str) -> Result<Vec<u8>> {
        let file_path = self.file_path(file_id).await?;

        let response = self
            .client
            .get(self.file_url(&file_path))
            .timeout(Duration::from_secs(API_TIMEOUT_SECS))
            .send()
            .await
            .context("File download failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let error = response.text().await.unwrap_or_default();
            bail!("Telegram file download error ({status}): {error}");
        }

        let bytes = response.bytes().await.context("Failed to read file body")?;
        debug!(file_id, bytes = bytes.len(), "Downloaded Telegram file");
        Ok(bytes.to_vec())
    }
}
