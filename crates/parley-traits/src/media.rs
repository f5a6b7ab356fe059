//! Media collaborator traits.
//!
//! Attachments move through two external systems before a model can see them:
//! the messaging platform holds the raw bytes ([`MediaSource`]) and the AI
//! provider ingests them into a referenceable file ([`FileIngestor`]).
//! [`AttachmentResolver`] is the seam the history assembler talks to.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ResolveError;

/// A model-consumable reference produced by resolving an attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedRef {
    /// Provider file URI handed to the model.
    pub uri: String,
    pub mime_type: String,
    /// When the provider reported the file ready (milliseconds since epoch).
    pub resolved_at: i64,
}

impl ResolvedRef {
    pub fn new(uri: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            mime_type: mime_type.into(),
            resolved_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Provider files expire, so a reference is only reused while younger than `ttl_ms`.
    pub fn is_fresh(&self, ttl_ms: i64, now_ms: i64) -> bool {
        now_ms.saturating_sub(self.resolved_at) < ttl_ms
    }
}

/// Handle returned by an upload, used to poll processing status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestHandle {
    /// Provider-side resource name (e.g. `files/abc123`).
    pub name: String,
    /// URI when the provider returns one with the upload response.
    pub uri: Option<String>,
}

/// Processing state reported by the AI provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestStatus {
    Processing,
    Ready { uri: String },
    Failed { reason: String },
}

/// Messaging platform collaborator: raw bytes for a platform file id.
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn fetch(&self, file_id: &str) -> anyhow::Result<Vec<u8>>;
}

/// AI provider collaborator: file ingestion endpoint plus status polling.
#[async_trait]
pub trait FileIngestor: Send + Sync {
    async fn upload(
        &self,
        bytes: Vec<u8>,
        mime_type: &str,
        display_name: &str,
    ) -> anyhow::Result<IngestHandle>;

    async fn status(&self, handle: &IngestHandle) -> anyhow::Result<IngestStatus>;
}

/// Resolves a raw platform media reference into a model-consumable reference.
#[async_trait]
pub trait AttachmentResolver: Send + Sync {
    async fn resolve(&self, source_ref: &str, mime_type: &str)
    -> Result<ResolvedRef, ResolveError>;
}
