//! Payload proxy with ranked-source fallback
//!
//! The whole payload is held in memory, so every transfer is bounded by the
//! configured size ceiling and verified against the declared content length
//! before anything is cached or returned. Candidates are tried highest
//! quality first; when all of them fail the *last* failure is surfaced so
//! callers see the freshest diagnostic.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::TtlStore;
use crate::error::{Error, Result};
use crate::resolve::Resolver;
use crate::upstream::VideoMetadata;

/// An owned, fully-buffered payload. Never mutated after creation; every
/// reader gets its own clone.
#[derive(Debug, Clone)]
pub struct VideoBuffer {
    pub data: Bytes,
    pub length: u64,
}

impl VideoBuffer {
    /// The length invariant: declared length matches the owned bytes
    /// exactly. A mismatch is a transfer error, never tolerated.
    pub fn is_consistent(&self) -> bool {
        self.length == self.data.len() as u64
    }
}

/// Check a finished transfer against its declared length.
pub fn verify_length(expected: u64, data: Bytes) -> Result<VideoBuffer> {
    let actual = data.len() as u64;
    if actual != expected {
        return Err(Error::LengthMismatch { expected, actual });
    }
    Ok(VideoBuffer {
        data,
        length: actual,
    })
}

/// Seam for fetching one bounded candidate payload. Tests inject fakes.
#[async_trait]
pub trait PayloadSource: Send + Sync {
    /// Fetch `url`, refusing anything over `max_bytes`. Implementations
    /// reject non-success statuses, zero-length and oversized responses,
    /// and verify the received byte count exactly.
    async fn fetch(&self, url: &str, max_bytes: u64) -> Result<VideoBuffer>;
}

/// reqwest-backed source issuing byte-range-bounded requests.
pub struct HttpPayloadSource {
    client: reqwest::Client,
}

impl HttpPayloadSource {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PayloadSource for HttpPayloadSource {
    async fn fetch(&self, url: &str, max_bytes: u64) -> Result<VideoBuffer> {
        let mut resp = self
            .client
            .get(url)
            .header(
                reqwest::header::RANGE,
                format!("bytes=0-{}", max_bytes.saturating_sub(1)),
            )
            .send()
            .await
            .map_err(Error::transport)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::UpstreamTransient {
                status: status.as_u16(),
            });
        }

        let declared = resp.content_length().unwrap_or(0);
        if declared == 0 {
            return Err(Error::UpstreamTransient { status: 204 });
        }
        if declared > max_bytes {
            return Err(Error::SizeExceeded {
                length: declared,
                max: max_bytes,
            });
        }

        // Buffer outside any lock; cancellation drops the connection and
        // nothing partial ever reaches the cache.
        let mut body = BytesMut::with_capacity(declared as usize);
        while let Some(chunk) = resp.chunk().await.map_err(Error::transport)? {
            if body.len() as u64 + chunk.len() as u64 > max_bytes {
                return Err(Error::SizeExceeded {
                    length: body.len() as u64 + chunk.len() as u64,
                    max: max_bytes,
                });
            }
            body.extend_from_slice(&chunk);
        }

        verify_length(declared, body.freeze())
    }
}

/// Fetches payloads for resolved metadata through the ranked format list.
pub struct ProxyEngine {
    source: Arc<dyn PayloadSource>,
    resolver: Arc<Resolver>,
    /// Short-TTL payload cache, independent from the metadata expiry.
    buffers: Arc<TtlStore<String, VideoBuffer>>,
    max_payload_bytes: u64,
}

impl ProxyEngine {
    pub fn new(
        source: Arc<dyn PayloadSource>,
        resolver: Arc<Resolver>,
        buffers: Arc<TtlStore<String, VideoBuffer>>,
        max_payload_bytes: u64,
    ) -> Self {
        Self {
            source,
            resolver,
            buffers,
            max_payload_bytes,
        }
    }

    /// Fetch the payload for `meta`, falling back through its ranked
    /// formats. A cached buffer short-circuits the whole loop; lapsed
    /// metadata is re-resolved (bypassing the cache) before any candidate
    /// is attempted, since a stale signed URL would fail them all.
    pub async fn fetch_payload(&self, meta: &VideoMetadata) -> Result<VideoBuffer> {
        if let Some(buffer) = self.buffers.get(&meta.video_id) {
            if buffer.is_consistent() {
                debug!(video_id = %meta.video_id, "Buffer cache hit");
                return Ok(buffer);
            }
            self.buffers.remove(&meta.video_id);
        }

        let refreshed;
        let meta = if meta.is_expired() {
            debug!(video_id = %meta.video_id, "Metadata lapsed; re-resolving before proxying");
            refreshed = self.resolver.resolve(&meta.video_id, false).await?;
            &refreshed
        } else {
            meta
        };

        if !meta.has_playable_source() {
            return Err(Error::NoPlayableSource(meta.video_id.clone()));
        }

        let mut last_err: Option<Error> = None;
        for format in meta.ranked_formats() {
            match self.source.fetch(&format.url, self.max_payload_bytes).await {
                Ok(buffer) => {
                    if !buffer.is_consistent() {
                        last_err = Some(Error::LengthMismatch {
                            expected: buffer.length,
                            actual: buffer.data.len() as u64,
                        });
                        continue;
                    }
                    self.buffers.set(meta.video_id.clone(), buffer.clone());
                    info!(
                        video_id = %meta.video_id,
                        label = %format.label,
                        bytes = buffer.length,
                        "Payload fetched and cached"
                    );
                    return Ok(buffer);
                }
                Err(e) => {
                    warn!(
                        video_id = %meta.video_id,
                        label = %format.label,
                        error = %e,
                        "Candidate fetch failed; trying next format"
                    );
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| Error::NoPlayableSource(meta.video_id.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::EvictionMode;
    use crate::store::MetadataStore;
    use crate::upstream::{epoch, Format, InstancePool, UpstreamApi};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    enum Outcome {
        Ok(Vec<u8>),
        SizeExceeded,
        Transient(u16),
        Inconsistent,
    }

    struct FakeSource {
        outcomes: HashMap<String, Outcome>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeSource {
        fn new(outcomes: Vec<(&str, Outcome)>) -> Self {
            Self {
                outcomes: outcomes
                    .into_iter()
                    .map(|(u, o)| (u.to_string(), o))
                    .collect(),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PayloadSource for FakeSource {
        async fn fetch(&self, url: &str, max_bytes: u64) -> Result<VideoBuffer> {
            self.calls.lock().unwrap().push(url.to_string());
            match self.outcomes.get(url) {
                Some(Outcome::Ok(data)) => Ok(VideoBuffer {
                    data: Bytes::copy_from_slice(data),
                    length: data.len() as u64,
                }),
                Some(Outcome::SizeExceeded) => Err(Error::SizeExceeded {
                    length: max_bytes + 1,
                    max: max_bytes,
                }),
                Some(Outcome::Transient(status)) => {
                    Err(Error::UpstreamTransient { status: *status })
                }
                Some(Outcome::Inconsistent) => Ok(VideoBuffer {
                    data: Bytes::from_static(b"abc"),
                    length: 99,
                }),
                None => Err(Error::UpstreamTransient { status: 404 }),
            }
        }
    }

    struct IdleUpstream {
        fetch_calls: AtomicUsize,
        fresh: Mutex<Option<VideoMetadata>>,
    }

    #[async_trait]
    impl UpstreamApi for IdleUpstream {
        async fn list_instances(&self) -> Result<Vec<String>> {
            Ok(vec!["a".to_string()])
        }

        async fn fetch_video(&self, _instance: &str, video_id: &str) -> Result<VideoMetadata> {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            self.fresh
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| Error::NotFound(video_id.to_string()))
        }
    }

    fn meta_with(urls: &[(&str, &str)], expires_unix: i64) -> VideoMetadata {
        VideoMetadata {
            video_id: "vid00000001".to_string(),
            title: "Title".to_string(),
            description: String::new(),
            uploader: "Uploader".to_string(),
            duration_seconds: 100,
            // Upstream order is ascending quality
            formats: urls
                .iter()
                .map(|(label, url)| Format {
                    label: label.to_string(),
                    container: "mp4".to_string(),
                    url: url.to_string(),
                    size_hint: String::new(),
                })
                .collect(),
            expires_at: Utc.timestamp_opt(expires_unix, 0).unwrap(),
            fetched_at: epoch(),
        }
    }

    fn engine_with(
        source: FakeSource,
        fresh: Option<VideoMetadata>,
    ) -> (ProxyEngine, Arc<FakeSource>, Arc<IdleUpstream>) {
        let source = Arc::new(source);
        let api = Arc::new(IdleUpstream {
            fetch_calls: AtomicUsize::new(0),
            fresh: Mutex::new(fresh),
        });
        let pool = Arc::new(InstancePool::new(
            Arc::clone(&api) as Arc<dyn UpstreamApi>,
            Duration::from_secs(60),
        ));
        let store = Arc::new(MetadataStore::open_in_memory().unwrap());
        let misses = Arc::new(TtlStore::new(Duration::from_secs(60), EvictionMode::Lazy));
        let resolver = Arc::new(Resolver::new(
            Arc::clone(&api) as Arc<dyn UpstreamApi>,
            pool,
            store,
            misses,
            3,
        ));
        let buffers = Arc::new(TtlStore::new(Duration::from_secs(60), EvictionMode::Lazy));
        let engine = ProxyEngine::new(
            Arc::clone(&source) as Arc<dyn PayloadSource>,
            resolver,
            buffers,
            1024,
        );
        (engine, source, api)
    }

    fn future_unix() -> i64 {
        Utc::now().timestamp() + 3600
    }

    #[tokio::test]
    async fn test_oversized_candidate_falls_back() {
        // Scenario C: highest-quality candidate exceeds the ceiling, the
        // next one succeeds
        let meta = meta_with(
            &[("360p", "https://low.example/v"), ("720p", "https://high.example/v")],
            future_unix(),
        );
        let source = FakeSource::new(vec![
            ("https://high.example/v", Outcome::SizeExceeded),
            ("https://low.example/v", Outcome::Ok(b"payload".to_vec())),
        ]);
        let (engine, _source, _) = engine_with(source, None);

        let buffer = engine.fetch_payload(&meta).await.unwrap();
        assert_eq!(buffer.data.as_ref(), b"payload");
        assert_eq!(buffer.length, 7);
    }

    #[tokio::test]
    async fn test_candidates_tried_highest_quality_first() {
        let meta = meta_with(
            &[("360p", "https://low.example/v"), ("720p", "https://high.example/v")],
            future_unix(),
        );
        let source = FakeSource::new(vec![(
            "https://high.example/v",
            Outcome::Ok(b"hq".to_vec()),
        )]);
        let (engine, _source, _) = engine_with(source, None);

        let buffer = engine.fetch_payload(&meta).await.unwrap();
        assert_eq!(buffer.data.as_ref(), b"hq");
    }

    #[tokio::test]
    async fn test_buffer_cache_short_circuits() {
        let meta = meta_with(&[("360p", "https://low.example/v")], future_unix());
        let source = FakeSource::new(vec![(
            "https://low.example/v",
            Outcome::Ok(b"payload".to_vec()),
        )]);
        let (engine, source, _) = engine_with(source, None);

        let first = engine.fetch_payload(&meta).await.unwrap();
        let second = engine.fetch_payload(&meta).await.unwrap();
        assert_eq!(first.data, second.data);
        assert_eq!(source.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_length_mismatch_never_returned() {
        let meta = meta_with(
            &[("360p", "https://low.example/v"), ("720p", "https://high.example/v")],
            future_unix(),
        );
        let source = FakeSource::new(vec![
            ("https://high.example/v", Outcome::Inconsistent),
            ("https://low.example/v", Outcome::Ok(b"good".to_vec())),
        ]);
        let (engine, _source, _) = engine_with(source, None);

        let buffer = engine.fetch_payload(&meta).await.unwrap();
        assert!(buffer.is_consistent());
        assert_eq!(buffer.data.as_ref(), b"good");
    }

    #[tokio::test]
    async fn test_last_failure_is_surfaced() {
        let meta = meta_with(
            &[("360p", "https://low.example/v"), ("720p", "https://high.example/v")],
            future_unix(),
        );
        let source = FakeSource::new(vec![
            ("https://high.example/v", Outcome::SizeExceeded),
            ("https://low.example/v", Outcome::Transient(410)),
        ]);
        let (engine, _source, _) = engine_with(source, None);

        let err = engine.fetch_payload(&meta).await.unwrap_err();
        assert!(matches!(err, Error::UpstreamTransient { status: 410 }));
    }

    #[tokio::test]
    async fn test_lapsed_metadata_is_reresolved_first() {
        let stale = meta_with(&[("360p", "https://old.example/v")], 100);
        let mut fresh = meta_with(&[("360p", "https://new.example/v?expire=0")], 0);
        fresh.formats[0].url = format!("https://new.example/v?expire={}", future_unix());
        let source = FakeSource::new(vec![(
            fresh.formats[0].url.as_str(),
            Outcome::Ok(b"fresh".to_vec()),
        )]);
        let (engine, _source, api) = engine_with(source, Some(fresh));

        let buffer = engine.fetch_payload(&stale).await.unwrap();
        assert_eq!(buffer.data.as_ref(), b"fresh");
        assert_eq!(api.fetch_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_playable_source() {
        let mut meta = meta_with(&[], future_unix());
        meta.formats.clear();
        let (engine, _source, _) = engine_with(FakeSource::new(vec![]), None);

        let err = engine.fetch_payload(&meta).await.unwrap_err();
        assert!(matches!(err, Error::NoPlayableSource(_)));
    }

    #[test]
    fn test_verify_length() {
        let ok = verify_length(3, Bytes::from_static(b"abc")).unwrap();
        assert!(ok.is_consistent());

        let err = verify_length(5, Bytes::from_static(b"abc")).unwrap_err();
        assert!(matches!(
            err,
            Error::LengthMismatch {
                expected: 5,
                actual: 3
            }
        ));
    }
}
