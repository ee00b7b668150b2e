//! Resolution pipeline: cache → upstream → validate → persist
//!
//! The cache is authoritative on a hit and never re-validated against
//! upstream. On a miss the fetch goes through the instance pool; transient
//! failures rotate the pool and retry inside a bounded loop rather than by
//! recursion. A terminal not-found never rotates: switching instances cannot
//! change whether the content exists.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::TtlStore;
use crate::error::{Error, Result};
use crate::store::MetadataStore;
use crate::upstream::{InstancePool, UpstreamApi, VideoMetadata};

pub struct Resolver {
    api: Arc<dyn UpstreamApi>,
    pool: Arc<InstancePool>,
    store: Arc<MetadataStore>,
    /// Memoized terminal misses; repeat requests skip upstream entirely.
    misses: Arc<TtlStore<String, ()>>,
    max_attempts: u32,
}

impl Resolver {
    pub fn new(
        api: Arc<dyn UpstreamApi>,
        pool: Arc<InstancePool>,
        store: Arc<MetadataStore>,
        misses: Arc<TtlStore<String, ()>>,
        max_attempts: u32,
    ) -> Self {
        Self {
            api,
            pool,
            store,
            misses,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Resolve metadata for `video_id`.
    ///
    /// With `allow_cache` the persisted row is consulted first; retries
    /// after an instance rotation always re-check it. Persisting the fresh
    /// result is best-effort: a failing store is logged and the value is
    /// still returned.
    pub async fn resolve(&self, video_id: &str, allow_cache: bool) -> Result<VideoMetadata> {
        if self.misses.has(&video_id.to_string()) {
            debug!(video_id, "Negative cache hit");
            return Err(Error::NotFound(video_id.to_string()));
        }

        let mut allow_cache = allow_cache;
        let mut last_err: Option<Error> = None;

        for attempt in 0..self.max_attempts {
            if allow_cache {
                match self.store.lookup(video_id) {
                    Ok(Some(meta)) => {
                        debug!(video_id, "Metadata cache hit");
                        return Ok(meta);
                    }
                    Ok(None) => {}
                    Err(e) => warn!(video_id, error = %e, "Metadata cache read failed"),
                }
            }
            allow_cache = true;

            let instance = match self.pool.current().await {
                Some(instance) => instance,
                None => self.pool.select().await?,
            };

            match self.api.fetch_video(&instance, video_id).await {
                Ok(mut meta) => {
                    meta.normalize();
                    if !meta.has_playable_source() {
                        // Valid result: the caller deep-links instead of proxying
                        debug!(video_id, "No playable format after filtering");
                    }
                    if let Err(e) = self.store.store(&meta) {
                        warn!(video_id, error = %e, "Caching metadata failed; returning fresh value");
                    }
                    info!(
                        video_id,
                        instance = %instance,
                        formats = meta.formats.len(),
                        "Resolved metadata upstream"
                    );
                    return Ok(meta);
                }
                Err(Error::NotFound(id)) => {
                    self.misses.set(id.clone(), ());
                    return Err(Error::NotFound(id));
                }
                Err(e @ Error::UpstreamTransient { .. }) => {
                    warn!(
                        video_id,
                        instance = %instance,
                        error = %e,
                        attempt,
                        "Upstream fetch failed; rotating instance"
                    );
                    last_err = Some(e);
                    if attempt + 1 < self.max_attempts {
                        self.pool.select().await?;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or(Error::NoCandidateInstance))
    }
}
