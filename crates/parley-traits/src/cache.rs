//! Content cache abstraction for attachment bytes.
//!
//! Keys are platform source ids, so a fetched file is reused across retries
//! without going back to the messaging platform. Implementations may be backed
//! by memory, disk, or object storage.

/// Byte cache keyed by source id.
#[async_trait::async_trait]
pub trait BlobCache: Send + Sync {
    /// Cached bytes for `key`, or `None` on a miss.
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;

    /// Store bytes under `key`, replacing any previous entry.
    async fn put(&self, key: &str, bytes: &[u8]) -> anyhow::Result<()>;
}
