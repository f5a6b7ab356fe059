//! Parley Traits - Shared trait definitions and collaborator seams.
//!
//! This crate provides the interfaces the rest of the workspace is written
//! against:
//! - AttachmentResolver and its error taxonomy
//! - MediaSource (messaging platform file retrieval)
//! - FileIngestor (AI provider upload + processing status)
//! - BlobCache (content cache keyed by source id)

pub mod cache;
pub mod error;
pub mod media;

// ── Top-level re-exports ─────────────────────────────────────────────

pub use cache::BlobCache;
pub use error::ResolveError;
pub use media::{AttachmentResolver, FileIngestor, IngestHandle, IngestStatus, MediaSource, ResolvedRef};
