use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use parley_traits::{
    AttachmentResolver, BlobCache, FileIngestor, IngestHandle, IngestStatus, MediaSource,
    ResolveError, ResolvedRef,
};
use tracing::{debug, info, warn};

use crate::config::MediaConfig;

type SharedResolution = Shared<BoxFuture<'static, Result<ResolvedRef, ResolveError>>>;

/// Polling and caching limits for [`CachingResolver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolverConfig {
    pub poll_interval: Duration,
    pub max_polls: u32,
    /// Overall bound on waiting for the provider, independent of `max_polls`.
    pub max_wait: Duration,
    /// How long a resolved reference is served from memory.
    pub cache_ttl: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self::from(&MediaConfig::default())
    }
}

impl From<&MediaConfig> for ResolverConfig {
    fn from(config: &MediaConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            max_polls: config.max_polls,
            max_wait: config.max_wait(),
            cache_ttl: config.resolved_ref_ttl(),
        }
    }
}

struct ResolverInner {
    source: Arc<dyn MediaSource>,
    ingestor: Arc<dyn FileIngestor>,
    blobs: Arc<dyn BlobCache>,
    config: ResolverConfig,
    resolved: DashMap<String, ResolvedRef>,
    in_flight: Mutex<HashMap<String, SharedResolution>>,
}

/// Attachment resolver with a byte cache, a resolution cache and shared
/// in-flight work.
///
/// Each resolution runs as its own task. Concurrent callers for the same
/// source ref await the same task, and a caller that gives up does not cancel
/// it: the result still lands in the cache for the next turn. Expired
/// entries are dropped whenever a new resolution lands.
#[derive(Clone)]
pub struct CachingResolver {
    inner: Arc<ResolverInner>,
}

impl std::fmt::Debug for CachingResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachingResolver")
            .field("config", &self.inner.config)
            .field("cached", &self.inner.resolved.len())
            .finish()
    }
}

impl CachingResolver {
    pub fn new(
        source: Arc<dyn MediaSource>,
        ingestor: Arc<dyn FileIngestor>,
        blobs: Arc<dyn BlobCache>,
        config: ResolverConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ResolverInner {
                source,
                ingestor,
                blobs,
                config,
                resolved: DashMap::new(),
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// A fresh cached resolution, if any.
    pub fn cached(&self, source_ref: &str) -> Option<ResolvedRef> {
        self.inner.cached(source_ref)
    }

    pub fn cached_count(&self) -> usize {
        self.inner.resolved.len()
    }

    /// Drop expired resolutions, returning how many were removed.
    pub fn prune_expired(&self) -> usize {
        self.inner.prune_expired()
    }

    pub fn in_flight_count(&self) -> usize {
        self.inner.in_flight.lock().len()
    }

    fn spawn_resolution(&self, source_ref: &str, mime_type: &str) -> SharedResolution {
        let inner = self.inner.clone();
        let key = source_ref.to_string();
        let mime = mime_type.to_string();

        let task = tokio::spawn(async move {
            let result = inner.resolve_uncached(&key, &mime).await;
            if let Ok(resolved) = &result {
                inner.resolved.insert(key.clone(), resolved.clone());
                let pruned = inner.prune_expired();
                if pruned > 0 {
                    debug!(pruned, "Pruned expired resolutions");
                }
            }
            inner.in_flight.lock().remove(&key);
            result
        });

        let source_ref = source_ref.to_string();
        async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(ResolveError::processing(
                    source_ref,
                    format!("resolution task failed: {e}"),
                )),
            }
        }
        .boxed()
        .shared()
    }
}

#[async_trait]
impl AttachmentResolver for CachingResolver {
    async fn resolve(&self, source_ref: &str, mime_type: &str) -> Result<ResolvedRef, ResolveError> {
        if let Some(hit) = self.inner.cached(source_ref) {
            return Ok(hit);
        }

        let pending = {
            let mut in_flight = self.inner.in_flight.lock();
            // A task may have finished between the first lookup and taking the lock.
            if let Some(hit) = self.inner.cached(source_ref) {
                return Ok(hit);
            }
            match in_flight.get(source_ref) {
                Some(existing) => {
                    debug!(source_ref, "Joining in-flight resolution");
                    existing.clone()
                }
                None => {
                    let pending = self.spawn_resolution(source_ref, mime_type);
                    in_flight.insert(source_ref.to_string(), pending.clone());
                    pending
                }
            }
        };

        pending.await
    }
}

impl ResolverInner {
    fn ttl_ms(&self) -> i64 {
        i64::try_from(self.config.cache_ttl.as_millis()).unwrap_or(i64::MAX)
    }

    fn prune_expired(&self) -> usize {
        let ttl_ms = self.ttl_ms();
        let now_ms = chrono::Utc::now().timestamp_millis();
        let before = self.resolved.len();
        self.resolved.retain(|_, resolved| resolved.is_fresh(ttl_ms, now_ms));
        before.saturating_sub(self.resolved.len())
    }

    fn cached(&self, source_ref: &str) -> Option<ResolvedRef> {
        let ttl_ms = self.ttl_ms();
        let now_ms = chrono::Utc::now().timestamp_millis();
        let hit = self.resolved.get(source_ref).map(|entry| entry.value().clone())?;
        if hit.is_fresh(ttl_ms, now_ms) {
            Some(hit)
        } else {
            self.resolved.remove(source_ref);
            None
        }
    }

    async fn resolve_uncached(
        &self,
        source_ref: &str,
        mime_type: &str,
    ) -> Result<ResolvedRef, ResolveError> {
        let started = Instant::now();
        let bytes = self.load_bytes(source_ref).await?;
        let size = bytes.len();

        let handle = self
            .ingestor
            .upload(bytes, mime_type, source_ref)
            .await
            .map_err(|e| ResolveError::processing(source_ref, format!("upload failed: {e:#}")))?;

        let uri = self.wait_until_ready(source_ref, &handle).await?;
        info!(
            source_ref,
            bytes = size,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Attachment resolved"
        );
        Ok(ResolvedRef::new(uri, mime_type))
    }

    /// Bytes from the blob cache, falling back to the platform.
    async fn load_bytes(&self, source_ref: &str) -> Result<Vec<u8>, ResolveError> {
        match self.blobs.get(source_ref).await {
            Ok(Some(bytes)) => return Ok(bytes),
            Ok(None) => {}
            Err(e) => warn!(source_ref, error = %e, "Blob cache read failed, refetching"),
        }

        let bytes = self
            .source
            .fetch(source_ref)
            .await
            .map_err(|e| ResolveError::retrieval(source_ref, format!("{e:#}")))?;

        if let Err(e) = self.blobs.put(source_ref, &bytes).await {
            warn!(source_ref, error = %e, "Failed to cache attachment bytes");
        }
        Ok(bytes)
    }

    async fn wait_until_ready(
        &self,
        source_ref: &str,
        handle: &IngestHandle,
    ) -> Result<String, ResolveError> {
        let started = Instant::now();
        let timeout = || ResolveError::Timeout {
            source_ref: source_ref.to_string(),
            waited_ms: started.elapsed().as_millis() as u64,
        };

        let polling = async {
            for attempt in 1..=self.config.max_polls {
                match self.ingestor.status(handle).await {
                    Ok(IngestStatus::Ready { uri }) => return Ok(uri),
                    Ok(IngestStatus::Failed { reason }) => {
                        return Err(ResolveError::processing(source_ref, reason));
                    }
                    Ok(IngestStatus::Processing) => {
                        debug!(source_ref, attempt, "Attachment still processing");
                    }
                    Err(e) => {
                        return Err(ResolveError::processing(
                            source_ref,
                            format!("status check failed: {e:#}"),
                        ));
                    }
                }
                if attempt < self.config.max_polls {
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
            Err(timeout())
        };

        match tokio::time::timeout(self.config.max_wait, polling).await {
            Ok(result) => result,
            Err(_) => Err(timeout()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_storage::MemoryBlobCache;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeSource {
        fetches: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl MediaSource for FakeSource {
        async fn fetch(&self, file_id: &str) -> anyhow::Result<Vec<u8>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("file {file_id} not found");
            }
            Ok(format!("bytes of {file_id}").into_bytes())
        }
    }

    /// Answers status polls from a script; `Ready` once the script runs out.
    #[derive(Default)]
    struct FakeIngestor {
        uploads: AtomicUsize,
        failing_uploads: AtomicUsize,
        upload_delay: Duration,
        script: Mutex<VecDeque<IngestStatus>>,
        never_ready: bool,
    }

    impl FakeIngestor {
        fn scripted(statuses: Vec<IngestStatus>) -> Self {
            Self {
                script: Mutex::new(statuses.into()),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl FileIngestor for FakeIngestor {
        async fn upload(
            &self,
            bytes: Vec<u8>,
            _mime_type: &str,
            display_name: &str,
        ) -> anyhow::Result<IngestHandle> {
            self.uploads.fetch_add(1, Ordering::SeqCst);
            if !self.upload_delay.is_zero() {
                tokio::time::sleep(self.upload_delay).await;
            }
            if self
                .failing_uploads
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                anyhow::bail!("quota exceeded");
            }
            assert!(!bytes.is_empty());
            Ok(IngestHandle {
                name: format!("files/{display_name}"),
                uri: None,
            })
        }

        async fn status(&self, handle: &IngestHandle) -> anyhow::Result<IngestStatus> {
            if self.never_ready {
                return Ok(IngestStatus::Processing);
            }
            Ok(self.script.lock().pop_front().unwrap_or(IngestStatus::Ready {
                uri: format!("https://provider/{}", handle.name),
            }))
        }
    }

    fn fast_config() -> ResolverConfig {
        ResolverConfig {
            poll_interval: Duration::from_millis(5),
            max_polls: 5,
            max_wait: Duration::from_secs(5),
            cache_ttl: Duration::from_secs(3600),
        }
    }

    fn resolver(
        source: Arc<FakeSource>,
        ingestor: Arc<FakeIngestor>,
        config: ResolverConfig,
    ) -> CachingResolver {
        CachingResolver::new(source, ingestor, Arc::new(MemoryBlobCache::new()), config)
    }

    #[tokio::test]
    async fn test_resolves_after_polling() {
        let source = Arc::new(FakeSource::default());
        let ingestor = Arc::new(FakeIngestor::scripted(vec![
            IngestStatus::Processing,
            IngestStatus::Processing,
        ]));
        let resolver = resolver(source.clone(), ingestor.clone(), fast_config());

        let resolved = resolver.resolve("photo-1", "image/jpeg").await.unwrap();
        assert_eq!(resolved.uri, "https://provider/files/photo-1");
        assert_eq!(resolved.mime_type, "image/jpeg");
        assert_eq!(resolver.cached("photo-1"), Some(resolved));
        assert_eq!(resolver.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_collaborators() {
        let source = Arc::new(FakeSource::default());
        let ingestor = Arc::new(FakeIngestor::default());
        let resolver = resolver(source.clone(), ingestor.clone(), fast_config());

        let first = resolver.resolve("photo-1", "image/jpeg").await.unwrap();
        let second = resolver.resolve("photo-1", "image/jpeg").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(ingestor.uploads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_resolution() {
        let source = Arc::new(FakeSource::default());
        let ingestor = Arc::new(FakeIngestor {
            upload_delay: Duration::from_millis(50),
            ..FakeIngestor::default()
        });
        let resolver = resolver(source.clone(), ingestor.clone(), fast_config());

        let (a, b, c) = tokio::join!(
            resolver.resolve("voice-1", "audio/ogg"),
            resolver.resolve("voice-1", "audio/ogg"),
            resolver.resolve("voice-1", "audio/ogg"),
        );
        assert_eq!(a.unwrap(), b.clone().unwrap());
        assert!(c.is_ok());
        assert_eq!(ingestor.uploads.load(Ordering::SeqCst), 1);
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retrieval_failure_is_not_cached() {
        let source = Arc::new(FakeSource {
            fail: true,
            ..FakeSource::default()
        });
        let ingestor = Arc::new(FakeIngestor::default());
        let resolver = resolver(source.clone(), ingestor.clone(), fast_config());

        let err = resolver.resolve("gone", "image/jpeg").await.unwrap_err();
        assert!(matches!(err, ResolveError::Retrieval { .. }));
        assert!(resolver.resolve("gone", "image/jpeg").await.is_err());
        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
        assert_eq!(ingestor.uploads.load(Ordering::SeqCst), 0);
        assert_eq!(resolver.cached_count(), 0);
    }

    #[tokio::test]
    async fn test_upload_retry_reuses_cached_bytes() {
        let source = Arc::new(FakeSource::default());
        let ingestor = Arc::new(FakeIngestor {
            failing_uploads: AtomicUsize::new(1),
            ..FakeIngestor::default()
        });
        let resolver = resolver(source.clone(), ingestor.clone(), fast_config());

        let err = resolver.resolve("doc-1", "application/pdf").await.unwrap_err();
        assert!(matches!(err, ResolveError::Processing { .. }));

        resolver.resolve("doc-1", "application/pdf").await.unwrap();
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(ingestor.uploads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_processing() {
        let ingestor = Arc::new(FakeIngestor::scripted(vec![IngestStatus::Failed {
            reason: "unsupported codec".to_string(),
        }]));
        let resolver = resolver(Arc::new(FakeSource::default()), ingestor, fast_config());

        let err = resolver.resolve("video-1", "video/mp4").await.unwrap_err();
        assert_eq!(
            err,
            ResolveError::Processing {
                source_ref: "video-1".to_string(),
                message: "unsupported codec".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_poll_limit_times_out() {
        let ingestor = Arc::new(FakeIngestor {
            never_ready: true,
            ..FakeIngestor::default()
        });
        let resolver = resolver(Arc::new(FakeSource::default()), ingestor, fast_config());

        let err = resolver.resolve("video-1", "video/mp4").await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_max_wait_times_out() {
        let ingestor = Arc::new(FakeIngestor {
            never_ready: true,
            ..FakeIngestor::default()
        });
        let config = ResolverConfig {
            poll_interval: Duration::from_millis(50),
            max_polls: 1000,
            max_wait: Duration::from_millis(120),
            ..fast_config()
        };
        let resolver = resolver(Arc::new(FakeSource::default()), ingestor, config);

        let started = Instant::now();
        let err = resolver.resolve("video-1", "video/mp4").await.unwrap_err();
        assert!(err.is_timeout());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_abandoned_caller_still_populates_cache() {
        let ingestor = Arc::new(FakeIngestor {
            upload_delay: Duration::from_millis(50),
            ..FakeIngestor::default()
        });
        let resolver = resolver(Arc::new(FakeSource::default()), ingestor, fast_config());

        let abandoned =
            tokio::time::timeout(Duration::from_millis(5), resolver.resolve("photo-9", "image/png")).await;
        assert!(abandoned.is_err());
        assert!(resolver.cached("photo-9").is_none());

        for _ in 0..100 {
            if resolver.cached("photo-9").is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(resolver.cached("photo-9").is_some());
        assert_eq!(resolver.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_expired_cache_entry_is_refreshed() {
        let source = Arc::new(FakeSource::default());
        let ingestor = Arc::new(FakeIngestor::default());
        let config = ResolverConfig {
            cache_ttl: Duration::ZERO,
            ..fast_config()
        };
        let resolver = resolver(source, ingestor.clone(), config);

        resolver.resolve("photo-1", "image/jpeg").await.unwrap();
        resolver.resolve("photo-1", "image/jpeg").await.unwrap();
        assert_eq!(ingestor.uploads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_new_resolution_prunes_expired_entries() {
        let config = ResolverConfig {
            cache_ttl: Duration::from_millis(200),
            ..fast_config()
        };
        let resolver = resolver(
            Arc::new(FakeSource::default()),
            Arc::new(FakeIngestor::default()),
            config,
        );

        resolver.resolve("photo-1", "image/jpeg").await.unwrap();
        resolver.resolve("photo-2", "image/jpeg").await.unwrap();
        assert_eq!(resolver.cached_count(), 2);

        tokio::time::sleep(Duration::from_millis(300)).await;
        resolver.resolve("photo-3", "image/jpeg").await.unwrap();
        assert_eq!(resolver.cached_count(), 1);
        assert!(resolver.cached("photo-3").is_some());
        assert_eq!(resolver.prune_expired(), 0);
    }
}
