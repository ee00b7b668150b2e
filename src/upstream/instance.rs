//! Upstream instance selection and failure blacklisting
//!
//! Any single upstream is unreliable: rate-limited, dead or inconsistent.
//! Selection therefore rotates away from the last-used instance on every
//! call and never picks an instance that failed within the blacklist window.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cache::{EvictionMode, TtlStore};
use crate::error::{Error, Result};

use super::UpstreamApi;

/// When a blacklisted instance last failed.
#[derive(Debug, Clone)]
pub struct FailureRecord {
    pub failed_at: Instant,
}

/// Tracks the preferred upstream instance plus a TTL blacklist of
/// recently-failed ones.
pub struct InstancePool {
    api: Arc<dyn UpstreamApi>,
    current: Mutex<Option<String>>,
    // Small and self-cleaning on access, so lazy eviction suffices here.
    blacklist: TtlStore<String, FailureRecord>,
}

impl InstancePool {
    pub fn new(api: Arc<dyn UpstreamApi>, blacklist_ttl: Duration) -> Self {
        Self {
            api,
            current: Mutex::new(None),
            blacklist: TtlStore::new(blacklist_ttl, EvictionMode::Lazy),
        }
    }

    /// The currently selected instance, if any.
    pub async fn current(&self) -> Option<String> {
        self.current.lock().await.clone()
    }

    /// Rotate to a fresh instance.
    ///
    /// Reselection happens because the current instance failed, so the
    /// previous current is blacklisted first and never rechosen within the
    /// window. The first non-blacklisted candidate in directory order wins.
    /// Holding the lock across the directory call keeps concurrent
    /// selections from racing each other.
    pub async fn select(&self) -> Result<String> {
        let mut current = self.current.lock().await;

        if let Some(previous) = current.take() {
            self.blacklist.set(
                previous,
                FailureRecord {
                    failed_at: Instant::now(),
                },
            );
        }

        let candidates = self.api.list_instances().await.map_err(|e| {
            warn!(error = %e, "Instance directory unreachable");
            Error::NoCandidateInstance
        })?;

        for host in candidates {
            if let Some(record) = self.blacklist.get(&host) {
                debug!(
                    instance = %host,
                    failed_secs_ago = record.failed_at.elapsed().as_secs(),
                    "Skipping blacklisted instance"
                );
                continue;
            }
            info!(instance = %host, "Selected upstream instance");
            *current = Some(host.clone());
            return Ok(host);
        }

        warn!("Every directory candidate is blacklisted");
        Err(Error::NoCandidateInstance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::VideoMetadata;
    use async_trait::async_trait;

    struct FakeDirectory {
        instances: Vec<String>,
        fail: bool,
    }

    impl FakeDirectory {
        fn new(instances: &[&str]) -> Self {
            Self {
                instances: instances.iter().map(|s| s.to_string()).collect(),
                fail: false,
            }
        }
    }

    #[async_trait]
    impl UpstreamApi for FakeDirectory {
        async fn list_instances(&self) -> Result<Vec<String>> {
            if self.fail {
                return Err(Error::UpstreamTransient { status: 502 });
            }
            Ok(self.instances.clone())
        }

        async fn fetch_video(&self, _instance: &str, video_id: &str) -> Result<VideoMetadata> {
            Err(Error::NotFound(video_id.to_string()))
        }
    }

    #[tokio::test]
    async fn test_select_prefers_directory_order() {
        let api = Arc::new(FakeDirectory::new(&["a", "b", "c"]));
        let pool = InstancePool::new(api, Duration::from_secs(60));

        assert!(pool.current().await.is_none());
        assert_eq!(pool.select().await.unwrap(), "a");
        assert_eq!(pool.current().await.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_select_rotates_away_from_previous() {
        let api = Arc::new(FakeDirectory::new(&["a", "b", "c"]));
        let pool = InstancePool::new(api, Duration::from_secs(60));

        assert_eq!(pool.select().await.unwrap(), "a");
        // "a" just failed; it must not be rechosen within the window
        assert_eq!(pool.select().await.unwrap(), "b");
        assert_eq!(pool.select().await.unwrap(), "c");
    }

    #[tokio::test]
    async fn test_all_candidates_blacklisted() {
        let api = Arc::new(FakeDirectory::new(&["a", "b"]));
        let pool = InstancePool::new(api, Duration::from_secs(60));

        pool.select().await.unwrap();
        pool.select().await.unwrap();
        let err = pool.select().await.unwrap_err();
        assert!(matches!(err, Error::NoCandidateInstance));
        assert!(pool.current().await.is_none());
    }

    #[tokio::test]
    async fn test_directory_failure() {
        let mut api = FakeDirectory::new(&["a"]);
        api.fail = true;
        let pool = InstancePool::new(Arc::new(api), Duration::from_secs(60));

        let err = pool.select().await.unwrap_err();
        assert!(matches!(err, Error::NoCandidateInstance));
    }

    #[tokio::test]
    async fn test_blacklist_expires() {
        let api = Arc::new(FakeDirectory::new(&["a", "b"]));
        let pool = InstancePool::new(api, Duration::from_millis(40));

        assert_eq!(pool.select().await.unwrap(), "a");
        assert_eq!(pool.select().await.unwrap(), "b");

        tokio::time::sleep(Duration::from_millis(80)).await;

        // "a"'s blacklist entry lapsed; "b" was just blacklisted
        assert_eq!(pool.select().await.unwrap(), "a");
    }
}
