//! Generic expiring key/value store
//!
//! Backs the negative-result memo, the instance blacklist and the payload
//! buffer cache. Two eviction disciplines are supported:
//!
//! - **Lazy**: every operation sweeps the whole store before answering.
//! - **Background**: a periodic sweep task evicts on its own schedule;
//!   operations never evict.
//!
//! Under either discipline a read never returns an entry older than the
//! store's TTL. `get`/`has` refuse stale entries but leave eviction to the
//! sweeps themselves.

use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::debug;

/// Eviction discipline for a [`TtlStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionMode {
    /// Sweep all entries before answering any operation.
    Lazy,
    /// Rely on a periodic sweep spawned via [`spawn_sweep_task`].
    Background,
}

/// A stored value plus its insertion time.
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
}

/// Concurrent expiring key/value container.
pub struct TtlStore<K: Eq + Hash + Clone, V: Clone> {
    entries: DashMap<K, CacheEntry<V>>,
    ttl: Duration,
    mode: EvictionMode,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlStore<K, V> {
    pub fn new(ttl: Duration, mode: EvictionMode) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            mode,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn is_fresh(&self, entry: &CacheEntry<V>) -> bool {
        entry.inserted_at.elapsed() <= self.ttl
    }

    fn sweep_if_lazy(&self) {
        if self.mode == EvictionMode::Lazy {
            self.sweep();
        }
    }

    /// Remove every expired entry. Returns how many were evicted.
    pub fn sweep(&self) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries.retain(|_, e| e.inserted_at.elapsed() <= ttl);
        before.saturating_sub(self.entries.len())
    }

    /// Insert or replace, resetting the entry's age to zero.
    pub fn set(&self, key: K, value: V) {
        self.sweep_if_lazy();
        self.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Fetch a clone of the value, or `None` for missing and stale entries
    /// alike.
    pub fn get(&self, key: &K) -> Option<V> {
        self.sweep_if_lazy();
        self.entries
            .get(key)
            .and_then(|e| self.is_fresh(&e).then(|| e.value.clone()))
    }

    pub fn has(&self, key: &K) -> bool {
        self.sweep_if_lazy();
        self.entries
            .get(key)
            .map(|e| self.is_fresh(&e))
            .unwrap_or(false)
    }

    /// Remove an entry, returning its value if it was still fresh.
    pub fn remove(&self, key: &K) -> Option<V> {
        self.sweep_if_lazy();
        self.entries
            .remove(key)
            .and_then(|(_, e)| self.is_fresh(&e).then_some(e.value))
    }

    /// Drop every entry, fresh or stale.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Physical entry count, stale entries included (background mode keeps
    /// them around until the next sweep).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Handle to a background sweep task. Aborts the task when dropped, so a
/// store can be torn down without leaking its timer.
pub struct SweepHandle {
    handle: JoinHandle<()>,
}

impl SweepHandle {
    pub fn stop(self) {
        self.handle.abort();
    }
}

impl Drop for SweepHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Spawn the periodic sweep for a background-discipline store.
pub fn spawn_sweep_task<K, V>(store: Arc<TtlStore<K, V>>, interval: Duration) -> SweepHandle
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    let handle = tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            let evicted = store.sweep();
            if evicted > 0 {
                debug!(evicted, "TTL sweep removed expired entries");
            }
        }
    });
    SweepHandle { handle }
}
