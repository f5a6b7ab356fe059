//! Attachment byte caches.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use parking_lot::RwLock;
use parley_traits::BlobCache;
use tracing::debug;

/// Disk-backed cache: one file per key under a single directory.
///
/// Files are written to a unique `.part` name and renamed into place, so a
/// reader never sees a half-written entry. The retention janitor sweeps this
/// directory by modification time.
#[derive(Debug, Clone)]
pub struct DiskBlobCache {
    dir: PathBuf,
}

impl DiskBlobCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the cached file for `key`.
    pub fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(sanitize_key(key))
    }
}

/// Map a platform id onto a safe file name.
fn sanitize_key(key: &str) -> String {
    let name: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if name.is_empty() {
        "_".to_string()
    } else {
        name
    }
}

#[async_trait]
impl BlobCache for DiskBlobCache {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let path = self.entry_path(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                debug!(key, bytes = bytes.len(), "Blob cache hit");
                Ok(Some(bytes))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;

        let path = self.entry_path(key);
        let part = self
            .dir
            .join(format!("{}.{}.part", sanitize_key(key), uuid::Uuid::new_v4()));

        tokio::fs::write(&part, bytes)
            .await
            .with_context(|| format!("Failed to write {}", part.display()))?;
        if let Err(e) = tokio::fs::rename(&part, &path).await {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(e).with_context(|| format!("Failed to move blob into {}", path.display()));
        }
        Ok(())
    }
}

/// In-memory cache for tests and offline tooling.
#[derive(Debug, Default)]
pub struct MemoryBlobCache {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl BlobCache for MemoryBlobCache {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> anyhow::Result<()> {
        self.entries.write().insert(key.to_string(), bytes.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_sanitize_key() {
        assert_eq!(sanitize_key("AgAD-x_1"), "AgAD-x_1");
        assert_eq!(sanitize_key("../etc/passwd"), "___etc_passwd");
        assert_eq!(sanitize_key(""), "_");
    }

    #[tokio::test]
    async fn test_disk_cache_miss_then_hit() {
        let dir = tempdir().unwrap();
        let cache = DiskBlobCache::new(dir.path().join("media"));

        assert!(cache.get("file-1").await.unwrap().is_none());
        cache.put("file-1", b"bytes").await.unwrap();
        assert_eq!(cache.get("file-1").await.unwrap(), Some(b"bytes".to_vec()));
        assert!(cache.entry_path("file-1").exists());
    }

    #[tokio::test]
    async fn test_disk_cache_put_leaves_no_part_files() {
        let dir = tempdir().unwrap();
        let cache = DiskBlobCache::new(dir.path());
        cache.put("a", b"one").await.unwrap();
        cache.put("a", b"two").await.unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a".to_string()]);
        assert_eq!(cache.get("a").await.unwrap(), Some(b"two".to_vec()));
    }

    #[tokio::test]
    async fn test_memory_cache() {
        let cache = MemoryBlobCache::new();
        assert!(cache.is_empty());
        cache.put("k", b"v").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(b"v".to_vec()));
        assert_eq!(cache.len(), 1);
    }
}
